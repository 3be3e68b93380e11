use serenity::model::id::GuildId;
use thiserror::Error;

/// Errores estructurales de la capa de nodos y players.
///
/// Los fallos transitorios de búsqueda no viven aquí: se devuelven como
/// datos dentro de [`TrackPlaylist`](crate::audio::track::TrackPlaylist).
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("node '{0}' is already registered")]
    NodeAlreadyRegistered(String),

    #[error("no nodes available")]
    NoNodesAvailable,

    #[error("no player or node for guild {0}")]
    InvalidSession(GuildId),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("player is already on node '{0}'")]
    SameNode(String),

    #[error("node '{0}' is not connected")]
    NodeUnavailable(String),

    #[error("unrecognized server version output: {0:?}")]
    VersionParse(String),

    #[error("equalizer band {0} out of range (0-14)")]
    InvalidBand(usize),

    #[error("queue is full ({0} tracks)")]
    QueueFull(usize),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid handshake header: {0}")]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("invalid node address: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

pub type AudioResult<T> = Result<T, AudioError>;
