use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serenity::model::id::UserId;
use std::{
    fmt,
    hash::{Hash, Hasher},
    time::Duration,
};
use tracing::warn;

/// Clave de `extras` que marca un track adelantado en la cola
pub const BUMPED_KEY: &str = "bumped";

/// Referencia opaca emitida por el servidor. Se guarda y se reenvía, nunca se analiza.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Un elemento reproducible. La igualdad y el hash solo miran [`Track::id`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub identifier: String,
    pub title: String,
    pub author: String,
    #[serde(with = "duration_ms")]
    pub length: Duration,
    pub uri: Option<String>,
    pub is_seekable: bool,
    pub is_stream: bool,
    pub source_name: Option<String>,
    pub requester: Option<UserId>,
    #[serde(with = "duration_ms")]
    pub start_offset: Duration,
    #[serde(default)]
    pub extras: Map<String, Value>,
}

impl Track {
    /// Crea un track con metadatos mínimos
    pub fn new(id: impl Into<TrackId>, title: impl Into<String>, length: Duration) -> Self {
        Self {
            id: id.into(),
            identifier: String::new(),
            title: title.into(),
            author: String::new(),
            length,
            uri: None,
            is_seekable: true,
            is_stream: false,
            source_name: None,
            requester: None,
            start_offset: Duration::ZERO,
            extras: Map::new(),
        }
    }

    /// Construye un track desde un objeto `info` del servidor. Los campos desconocidos van a `extras`.
    pub fn from_info(id: TrackId, info: Value) -> Result<Self, serde_json::Error> {
        let info: RawTrackInfo = serde_json::from_value(info)?;
        Ok(Self {
            id,
            identifier: info.identifier,
            title: info.title,
            author: info.author,
            length: Duration::from_millis(info.length),
            uri: info.uri,
            is_seekable: info.is_seekable,
            is_stream: info.is_stream,
            source_name: info.source_name,
            requester: None,
            start_offset: Duration::ZERO,
            extras: info.extra,
        })
    }

    pub fn with_requester(mut self, requester: UserId) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn with_start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn is_bumped(&self) -> bool {
        self.extras
            .get(BUMPED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn set_bumped(&mut self, bumped: bool) {
        if bumped {
            self.extras.insert(BUMPED_KEY.to_string(), Value::Bool(true));
        } else {
            self.extras.remove(BUMPED_KEY);
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionSeverity {
    #[serde(alias = "common")]
    Common,
    #[serde(alias = "suspicious")]
    Suspicious,
    #[serde(alias = "fatal", alias = "fault")]
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub message: String,
    pub severity: ExceptionSeverity,
}

impl LoadFailure {
    pub fn new(message: impl Into<String>, severity: ExceptionSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub name: String,
    pub selected_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

/// Resultado etiquetado de una carga o búsqueda
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackPlaylist {
    TrackLoaded(Vec<Track>),
    PlaylistLoaded { info: PlaylistInfo, tracks: Vec<Track> },
    SearchResult(Vec<Track>),
    NoMatches,
    LoadFailed(LoadFailure),
}

impl TrackPlaylist {
    pub fn load_failed(message: impl Into<String>, severity: ExceptionSeverity) -> Self {
        Self::LoadFailed(LoadFailure::new(message, severity))
    }

    pub fn load_type(&self) -> LoadType {
        match self {
            Self::TrackLoaded(_) => LoadType::TrackLoaded,
            Self::PlaylistLoaded { .. } => LoadType::PlaylistLoaded,
            Self::SearchResult(_) => LoadType::SearchResult,
            Self::NoMatches => LoadType::NoMatches,
            Self::LoadFailed(_) => LoadType::LoadFailed,
        }
    }

    /// Tracks del resultado (vacío para `NoMatches` y `LoadFailed`)
    pub fn tracks(&self) -> &[Track] {
        match self {
            Self::TrackLoaded(tracks)
            | Self::SearchResult(tracks)
            | Self::PlaylistLoaded { tracks, .. } => tracks,
            Self::NoMatches | Self::LoadFailed(_) => &[],
        }
    }

    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::TrackLoaded(tracks)
            | Self::SearchResult(tracks)
            | Self::PlaylistLoaded { tracks, .. } => tracks,
            Self::NoMatches | Self::LoadFailed(_) => Vec::new(),
        }
    }

    pub fn failure(&self) -> Option<&LoadFailure> {
        match self {
            Self::LoadFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn playlist_info(&self) -> Option<&PlaylistInfo> {
        match self {
            Self::PlaylistLoaded { info, .. } => Some(info),
            _ => None,
        }
    }

    /// Track seleccionado de una playlist, si el servidor lo indicó
    pub fn selected_track(&self) -> Option<&Track> {
        let info = self.playlist_info()?;
        self.tracks().get(info.selected_index?)
    }

    /// Aplica un offset de inicio a cada track salvo que el resultado sea una playlist
    pub fn with_start_offset(mut self, offset: Duration) -> Self {
        if offset.is_zero() {
            return self;
        }
        match &mut self {
            Self::TrackLoaded(tracks) | Self::SearchResult(tracks) => {
                for track in tracks.iter_mut() {
                    track.start_offset = offset;
                }
            }
            Self::PlaylistLoaded { .. } | Self::NoMatches | Self::LoadFailed(_) => {}
        }
        self
    }

    /// Interpreta el cuerpo de una respuesta de `/loadtracks`
    ///
    /// Nunca falla: las formas desconocidas se vuelven un `LoadFailed` sospechoso.
    /// Un array suelto es la respuesta de búsqueda anterior a v3.
    pub fn from_response(body: Value) -> Self {
        match body {
            Value::Array(items) => {
                let tracks = parse_tracks(items);
                if tracks.is_empty() {
                    Self::NoMatches
                } else {
                    Self::SearchResult(tracks)
                }
            }
            Value::Object(ref object) if object.contains_key("loadType") => {
                match serde_json::from_value::<RawLoadResult>(body.clone()) {
                    Ok(raw) => raw.into_playlist(),
                    Err(e) => {
                        warn!("⚠️ Respuesta de carga inválida: {}", e);
                        Self::unsupported(&body)
                    }
                }
            }
            other => Self::unsupported(&other),
        }
    }

    fn unsupported(body: &Value) -> Self {
        let field = |name: &str| {
            body.get(name)
                .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                .unwrap_or_else(|| "Unknown".to_string())
        };
        let message = format!(
            "Unsupported response from the node: timestamp={} status={} error={} message={}",
            field("timestamp"),
            field("status"),
            field("error"),
            field("message"),
        );
        Self::load_failed(message, ExceptionSeverity::Suspicious)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum RawLoadType {
    TrackLoaded,
    PlaylistLoaded,
    SearchResult,
    NoMatches,
    LoadFailed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLoadResult {
    load_type: RawLoadType,
    #[serde(default)]
    playlist_info: Option<RawPlaylistInfo>,
    #[serde(default)]
    tracks: Vec<Value>,
    #[serde(default)]
    exception: Option<RawException>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlaylistInfo {
    name: Option<String>,
    selected_track: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawException {
    message: Option<String>,
    severity: Option<ExceptionSeverity>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    track: TrackId,
    info: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrackInfo {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    length: u64,
    uri: Option<String>,
    #[serde(default)]
    is_seekable: bool,
    #[serde(default)]
    is_stream: bool,
    source_name: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl RawLoadResult {
    fn into_playlist(self) -> TrackPlaylist {
        let tracks = parse_tracks(self.tracks);
        match self.load_type {
            RawLoadType::TrackLoaded => TrackPlaylist::TrackLoaded(tracks),
            RawLoadType::SearchResult => TrackPlaylist::SearchResult(tracks),
            RawLoadType::NoMatches => TrackPlaylist::NoMatches,
            RawLoadType::PlaylistLoaded => {
                let info = self.playlist_info.unwrap_or(RawPlaylistInfo {
                    name: None,
                    selected_track: None,
                });
                TrackPlaylist::PlaylistLoaded {
                    info: PlaylistInfo {
                        name: info.name.unwrap_or_else(|| "Unknown".to_string()),
                        selected_index: info
                            .selected_track
                            .filter(|index| *index >= 0)
                            .and_then(|index| usize::try_from(index).ok()),
                    },
                    tracks,
                }
            }
            RawLoadType::LoadFailed => {
                let exception = self.exception.unwrap_or(RawException {
                    message: None,
                    severity: None,
                });
                TrackPlaylist::load_failed(
                    exception
                        .message
                        .unwrap_or_else(|| "Unknown error".to_string()),
                    exception.severity.unwrap_or(ExceptionSeverity::Fatal),
                )
            }
        }
    }
}

fn parse_tracks(items: Vec<Value>) -> Vec<Track> {
    items
        .into_iter()
        .filter_map(|item| {
            let raw: RawTrack = match serde_json::from_value(item) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("⚠️ Track ignorado por formato inválido: {}", e);
                    return None;
                }
            };
            Track::from_info(raw.track, raw.info)
                .map_err(|e| warn!("⚠️ Metadatos de track inválidos: {}", e))
                .ok()
        })
        .collect()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw_track(id: &str, title: &str) -> Value {
        json!({
            "track": id,
            "info": {
                "identifier": "dQw4w9WgXcQ",
                "isSeekable": true,
                "author": "Rick Astley",
                "length": 212000,
                "isStream": false,
                "position": 0,
                "title": title,
                "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "sourceName": "youtube",
                "artworkUrl": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg"
            }
        })
    }

    #[test]
    fn test_equality_by_id_only() {
        let a = Track::new("QAAA1", "One", Duration::from_secs(1));
        let mut b = Track::new("QAAA1", "Other", Duration::from_secs(99));
        b.set_bumped(true);
        assert_eq!(a, b);
        assert_ne!(a, Track::new("QAAA2", "One", Duration::from_secs(1)));
    }

    #[test]
    fn test_track_loaded() {
        let result = TrackPlaylist::from_response(json!({
            "loadType": "TRACK_LOADED",
            "playlistInfo": {},
            "tracks": [raw_track("QAAA1", "Never Gonna Give You Up")]
        }));
        assert_eq!(result.load_type(), LoadType::TrackLoaded);
        let track = &result.tracks()[0];
        assert_eq!(track.title, "Never Gonna Give You Up");
        assert_eq!(track.length, Duration::from_secs(212));
        assert_eq!(track.source_name.as_deref(), Some("youtube"));
        assert!(track.extras.contains_key("artworkUrl"));
        assert!(result.failure().is_none());
    }

    #[test]
    fn test_playlist_defaults() {
        let result = TrackPlaylist::from_response(json!({
            "loadType": "PLAYLIST_LOADED",
            "tracks": [raw_track("QAAA1", "a"), raw_track("QAAA2", "b")]
        }));
        assert_eq!(
            result.playlist_info(),
            Some(&PlaylistInfo {
                name: "Unknown".to_string(),
                selected_index: None
            })
        );
        assert!(result.selected_track().is_none());
        assert_eq!(result.tracks().len(), 2);
    }

    #[test]
    fn test_selected_track() {
        let result = TrackPlaylist::from_response(json!({
            "loadType": "PLAYLIST_LOADED",
            "playlistInfo": {"name": "Mix", "selectedTrack": 1},
            "tracks": [raw_track("QAAA1", "a"), raw_track("QAAA2", "b")]
        }));
        assert_eq!(result.selected_track().map(|t| t.title.as_str()), Some("b"));
    }

    #[test]
    fn test_load_failed_payload() {
        let result = TrackPlaylist::from_response(json!({
            "loadType": "LOAD_FAILED",
            "tracks": [],
            "exception": {"message": "This video is unavailable", "severity": "COMMON"}
        }));
        assert_eq!(
            result.failure(),
            Some(&LoadFailure::new("This video is unavailable", ExceptionSeverity::Common))
        );
        assert!(result.tracks().is_empty());
    }

    #[test]
    fn test_unsupported_response_is_suspicious_failure() {
        let result = TrackPlaylist::from_response(json!({
            "timestamp": 1667857581613u64,
            "status": 500,
            "error": "Internal Server Error"
        }));
        let failure = result.failure().unwrap();
        assert_eq!(failure.severity, ExceptionSeverity::Suspicious);
        assert!(failure.message.contains("Internal Server Error"));
    }

    #[test]
    fn test_bare_array_is_search_result() {
        let result = TrackPlaylist::from_response(json!([raw_track("QAAA1", "a")]));
        assert_eq!(result.load_type(), LoadType::SearchResult);
        assert_eq!(TrackPlaylist::from_response(json!([])), TrackPlaylist::NoMatches);
    }

    #[test]
    fn test_start_offset_skips_playlists() {
        let offset = Duration::from_secs(42);
        let search = TrackPlaylist::from_response(json!({
            "loadType": "SEARCH_RESULT",
            "tracks": [raw_track("QAAA1", "a")]
        }))
        .with_start_offset(offset);
        assert_eq!(search.tracks()[0].start_offset, offset);

        let playlist = TrackPlaylist::from_response(json!({
            "loadType": "PLAYLIST_LOADED",
            "tracks": [raw_track("QAAA1", "a")]
        }))
        .with_start_offset(offset);
        assert_eq!(playlist.tracks()[0].start_offset, Duration::ZERO);
    }
}
