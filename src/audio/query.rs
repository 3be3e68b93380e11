use regex::Regex;
use std::{sync::LazyLock, time::Duration};
use tracing::debug;

static YOUTUBE_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[&|?]t=(\d+)s?").expect("static regex"));
static SOUNDCLOUD_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#t=(\d+):(\d+)s?").expect("static regex"));
static TWITCH_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\?t=(\d+)h(\d+)m(\d+)s").expect("static regex"));

/// Prefijos de búsqueda que el nodo entiende tal cual
const SEARCH_PREFIXES: &[&str] = &["ytsearch:", "ytmsearch:", "scsearch:", "spsearch:", "amsearch:"];

/// Búsqueda lista para `/loadtracks`, más el offset de inicio que se le quitó
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub query: String,
    pub start_offset: Duration,
}

impl NormalizedQuery {
    fn untouched(query: &str) -> Self {
        Self {
            query: query.to_string(),
            start_offset: Duration::ZERO,
        }
    }
}

/// Quita el parámetro de inicio de URLs de plataformas conocidas
///
/// Las formas no reconocidas se devuelven intactas con offset cero.
pub fn normalize_query(raw: &str) -> NormalizedQuery {
    let query = raw.trim();
    let lower = query.to_lowercase();

    let normalized = if is_youtube(&lower) {
        youtube_timestamp(query, &lower)
    } else if lower.contains("soundcloud.com") {
        soundcloud_timestamp(query, &lower)
    } else if lower.contains("twitch.tv") {
        twitch_timestamp(query)
    } else {
        None
    };

    match normalized {
        Some(normalized) => {
            debug!(
                "⏱️ Marca de tiempo extraída: {} -> {} (+{}s)",
                query,
                normalized.query,
                normalized.start_offset.as_secs()
            );
            normalized
        }
        None => NormalizedQuery::untouched(query),
    }
}

/// Convierte texto libre en búsqueda de YouTube; URLs y prefijos pasan tal cual
pub fn search_query(raw: &str) -> String {
    let query = raw.trim();
    if is_url(query) || SEARCH_PREFIXES.iter().any(|prefix| query.starts_with(prefix)) {
        query.to_string()
    } else {
        format!("ytsearch:{query}")
    }
}

pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn is_youtube(lower: &str) -> bool {
    lower.starts_with("ytsearch:") || lower.contains("youtube.com") || lower.contains("youtu.be")
}

fn youtube_timestamp(query: &str, lower: &str) -> Option<NormalizedQuery> {
    if lower.contains("playlist?") && lower.contains("&list=") {
        return None;
    }
    let caps = YOUTUBE_TIMESTAMP.captures(query)?;
    let seconds: u64 = caps[1].parse().ok()?;
    let whole = caps.get(0)?;
    let mut stripped = String::with_capacity(query.len());
    stripped.push_str(&query[..whole.start()]);
    stripped.push_str(&query[whole.end()..]);
    // `?t=5&v=abc` deja la consulta sin su `?`
    if whole.as_str().starts_with('?') {
        if let Some(pos) = stripped[whole.start()..].find('&') {
            stripped.replace_range(whole.start() + pos..whole.start() + pos + 1, "?");
        }
    }
    Some(NormalizedQuery {
        query: stripped,
        start_offset: Duration::from_secs(seconds),
    })
}

fn soundcloud_timestamp(query: &str, lower: &str) -> Option<NormalizedQuery> {
    if lower.contains("/sets/") && !lower.contains("?in=") {
        return None;
    }
    let caps = SOUNDCLOUD_TIMESTAMP.captures(query)?;
    let minutes: u64 = caps[1].parse().ok()?;
    let seconds: u64 = caps[2].parse().ok()?;
    let start = caps.get(0)?.start();
    Some(NormalizedQuery {
        query: query[..start].to_string(),
        start_offset: Duration::from_secs(minutes * 60 + seconds),
    })
}

fn twitch_timestamp(query: &str) -> Option<NormalizedQuery> {
    let caps = TWITCH_TIMESTAMP.captures(query)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    let start = caps.get(0)?.start();
    Some(NormalizedQuery {
        query: query[..start].to_string(),
        start_offset: Duration::from_secs(hours * 3600 + minutes * 60 + seconds),
    })
}
