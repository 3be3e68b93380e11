//! # Local Playlists
//!
//! Reads playlist files into a uniform list of [`PlaylistEntry`].
//!
//! Supported formats: M3U/M3U8, PLS, XSPF, iTunes-style property lists and
//! plain text with one path per line. The format comes from the file
//! extension, or is sniffed from the content when there is none. Text
//! encoding is resolved by [`encoding::decode`] and never makes parsing
//! fail on its own.

pub mod encoding;
pub mod m3u;
pub mod pls;
pub mod xml;

use std::{path::Path, time::Duration};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("Failed to read playlist: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Missing required playlist element: {0}")]
    MissingElement(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaylistFormat {
    M3u,
    M3u8,
    Pls,
    Xspf,
    Plist,
    Text,
}

impl PlaylistFormat {
    /// Formato según la extensión del archivo
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        Some(match extension.as_str() {
            "m3u" => Self::M3u,
            "m3u8" => Self::M3u8,
            "pls" => Self::Pls,
            "xspf" => Self::Xspf,
            "xml" | "plist" => Self::Plist,
            "txt" => Self::Text,
            _ => return None,
        })
    }

    /// Adivina el formato por los primeros bytes del archivo
    ///
    /// Lo que no se reconoce se trata como texto plano.
    pub fn sniff(data: &[u8]) -> Self {
        let head = String::from_utf8_lossy(&data[..data.len().min(4096)]);
        let head = head.trim_start_matches('\u{feff}').trim_start();
        let first_line = head.lines().next().unwrap_or_default().trim();

        if first_line.starts_with("#EXTM3U") {
            if std::str::from_utf8(data).is_ok() {
                Self::M3u8
            } else {
                Self::M3u
            }
        } else if first_line.eq_ignore_ascii_case("[playlist]") {
            Self::Pls
        } else if head.contains("<playlist") && head.contains("xspf.org/ns/0") {
            Self::Xspf
        } else if head.contains("<plist") {
            Self::Plist
        } else {
            Self::Text
        }
    }

    /// Encoding que se asume antes de recurrir a la detección
    pub fn default_encoding(self) -> Option<&'static encoding_rs::Encoding> {
        match self {
            Self::M3u8 | Self::Xspf | Self::Plist => Some(encoding_rs::UTF_8),
            Self::M3u | Self::Pls | Self::Text => None,
        }
    }
}

/// Una entrada de una playlist local
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    /// Nombre tal como aparece en el archivo, p. ej. `Artista - Título`
    pub name: Option<String>,
    pub duration: Option<Duration>,
    pub file: String,
}

impl PlaylistEntry {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            ..Self::default()
        }
    }

    /// Rellena artista y título a partir de un nombre `Artista - Título`
    ///
    /// Con `invert` el nombre se lee como `Título - Artista`. Devuelve `false`
    /// salvo que el nombre tenga exactamente dos partes.
    pub fn split_name(&mut self, invert: bool) -> bool {
        let Some(name) = &self.name else { return false };
        let parts: Vec<&str> = name.split(" - ").collect();
        let [first, second] = parts.as_slice() else {
            return false;
        };
        let (artist, title) = if invert { (second, first) } else { (first, second) };
        self.artist = Some(artist.trim().to_string());
        self.title = Some(title.trim().to_string());
        true
    }

    /// Artistas posibles para nombres con más de un separador ` - `
    pub fn artist_candidates(&self, invert: bool) -> Vec<String> {
        let Some(name) = &self.name else { return Vec::new() };
        let mut parts: Vec<&str> = name.split(" - ").collect();
        if parts.len() < 3 {
            return Vec::new();
        }
        if invert {
            parts.reverse();
        }
        (1..parts.len())
            .map(|count| {
                let mut words = parts[..count].to_vec();
                if invert {
                    words.reverse();
                }
                words.join(" - ")
            })
            .collect()
    }

    /// Si `artist` aparece al final del nombre en vez de al principio
    pub fn is_inverted_for(&self, artist: &str) -> bool {
        self.name
            .as_deref()
            .and_then(|name| name.to_lowercase().rfind(&artist.to_lowercase()))
            .is_some_and(|pos| pos > 0)
    }

    pub(crate) fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name.filter(|name| !name.is_empty());
        if !self.split_name(false) {
            self.title = self.name.clone();
        }
        self
    }
}

/// Playlist analizada junto con el formato y el encoding usados
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlaylist {
    pub format: PlaylistFormat,
    pub encoding: &'static encoding_rs::Encoding,
    pub entries: Vec<PlaylistEntry>,
}

impl LocalPlaylist {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.entries.iter().filter_map(|entry| entry.duration).sum()
    }

    /// Relee cada nombre de entrada como `Título - Artista`
    pub fn invert_names(&mut self) {
        for entry in &mut self.entries {
            entry.split_name(true);
        }
    }
}

/// Analiza los bytes crudos de una playlist
///
/// `format` anula la detección; `encoding` es una etiqueta como `"utf-8"` o
/// `"iso-8859-2"` y se ignora si es desconocida o si no decodifica
/// limpiamente.
pub fn parse_bytes(
    data: &[u8],
    format: Option<PlaylistFormat>,
    encoding: Option<&str>,
) -> Result<LocalPlaylist, PlaylistError> {
    let format = format.unwrap_or_else(|| PlaylistFormat::sniff(data));
    let (text, encoding) = encoding::decode(data, encoding, format.default_encoding());
    debug!("📄 Playlist {:?} decodificada como {}", format, encoding.name());

    let entries = match format {
        PlaylistFormat::M3u | PlaylistFormat::M3u8 => m3u::parse_m3u(&text),
        PlaylistFormat::Pls => pls::parse_pls(&text),
        PlaylistFormat::Xspf => xml::parse_xspf(&text)?,
        PlaylistFormat::Plist => xml::parse_plist(&text)?,
        PlaylistFormat::Text => m3u::parse_text(&text),
    };

    Ok(LocalPlaylist {
        format,
        encoding,
        entries,
    })
}

/// Lee y analiza un archivo de playlist
pub async fn parse_file(path: &Path, encoding: Option<&str>) -> Result<LocalPlaylist, PlaylistError> {
    let data = tokio::fs::read(path).await?;
    let playlist = parse_bytes(&data, PlaylistFormat::from_path(path), encoding)?;
    info!(
        "📋 Playlist {} cargada: {} entradas ({})",
        path.display(),
        playlist.len(),
        humantime::format_duration(playlist.total_duration())
    );
    Ok(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(PlaylistFormat::from_path(Path::new("a/b.M3U8")), Some(PlaylistFormat::M3u8));
        assert_eq!(PlaylistFormat::from_path(Path::new("lib.xml")), Some(PlaylistFormat::Plist));
        assert_eq!(PlaylistFormat::from_path(Path::new("noext")), None);
        assert_eq!(PlaylistFormat::from_path(Path::new("a.wpl")), None);
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(PlaylistFormat::sniff(b"#EXTM3U\n/a.mp3\n"), PlaylistFormat::M3u8);
        assert_eq!(PlaylistFormat::sniff(b"#EXTM3U\n/caf\xe9.mp3\n"), PlaylistFormat::M3u);
        assert_eq!(PlaylistFormat::sniff(b"[playlist]\nFile1=a.mp3\n"), PlaylistFormat::Pls);
        assert_eq!(
            PlaylistFormat::sniff(br#"<?xml version="1.0"?><playlist version="1" xmlns="http://xspf.org/ns/0/">"#),
            PlaylistFormat::Xspf
        );
        assert_eq!(
            PlaylistFormat::sniff(br#"<?xml version="1.0"?><plist version="1.0"><dict/></plist>"#),
            PlaylistFormat::Plist
        );
        assert_eq!(PlaylistFormat::sniff(b"/music/a.mp3\n"), PlaylistFormat::Text);
    }

    #[test]
    fn test_name_splitting() {
        let mut entry = PlaylistEntry::new("a.mp3").with_name(Some("Daft Punk - One More Time".into()));
        assert_eq!(entry.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(entry.title.as_deref(), Some("One More Time"));

        assert!(entry.split_name(true));
        assert_eq!(entry.artist.as_deref(), Some("One More Time"));

        let entry = PlaylistEntry::new("b.mp3").with_name(Some("Just A Title".into()));
        assert_eq!(entry.artist, None);
        assert_eq!(entry.title.as_deref(), Some("Just A Title"));
    }

    #[test]
    fn test_artist_candidates() {
        let entry = PlaylistEntry::new("c.mp3").with_name(Some("A - B - C".into()));
        assert_eq!(entry.artist_candidates(false), vec!["A".to_string(), "A - B".to_string()]);
        assert_eq!(entry.artist_candidates(true), vec!["C".to_string(), "B - C".to_string()]);
        assert!(entry.is_inverted_for("c"));
        assert!(!entry.is_inverted_for("a"));
    }

    #[test]
    fn test_parse_bytes_uses_sniffed_format() {
        let playlist = parse_bytes(b"[playlist]\nFile1=a.mp3\nFile2=b.mp3\nNumberOfEntries=2\n", None, None).unwrap();
        assert_eq!(playlist.format, PlaylistFormat::Pls);
        assert_eq!(playlist.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_file_uses_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "#EXTM3U\n/a.mp3\n").unwrap();
        let playlist = parse_file(&path, None).await.unwrap();
        assert_eq!(playlist.format, PlaylistFormat::Text);
        assert_eq!(playlist.entries, vec![PlaylistEntry::new("/a.mp3")]);
    }
}
