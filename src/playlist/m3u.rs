use regex::Regex;
use std::{sync::LazyLock, time::Duration};

use super::PlaylistEntry;

static PARSE_URL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" parseUrl=\d+").expect("static regex"));

const EXTINF: &str = "#EXTINF:";
const STREAM_INF: &str = "#EXT-X-STREAM-INF:";

#[derive(Debug, Default)]
struct PendingInfo {
    name: Option<String>,
    duration: Option<Duration>,
}

/// Analiza texto M3U y M3U8
///
/// `#EXTINF:<segundos>,<nombre>` describe la ruta siguiente; una ruta sin él
/// sigue siendo una entrada. Las demás líneas `#` se ignoran.
pub fn parse_m3u(text: &str) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();
    let mut pending: Option<PendingInfo> = None;

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if let Some(info) = line.strip_prefix(EXTINF) {
            pending = Some(parse_extinf(info));
        } else if line.starts_with(STREAM_INF) {
            pending = Some(PendingInfo::default());
        } else if line.starts_with('#') {
            continue;
        } else {
            let file = PARSE_URL_SUFFIX.replace_all(line, "").into_owned();
            let info = pending.take().unwrap_or_default();
            let mut entry = PlaylistEntry::new(file).with_name(info.name);
            entry.duration = info.duration;
            entries.push(entry);
        }
    }
    entries
}

/// `-1 tvg-id="x",Artist - Title` → duration y nombre
fn parse_extinf(info: &str) -> PendingInfo {
    let (head, name) = match info.split_once(',') {
        Some((head, name)) => (head, Some(name.trim().to_string())),
        None => (info, None),
    };
    let duration = head
        .split_whitespace()
        .next()
        .and_then(|seconds| seconds.parse::<f64>().ok())
        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok());
    PendingInfo { name, duration }
}

/// Una ruta por línea; las líneas vacías y comentarios se ignoran
pub fn parse_text(text: &str) -> Vec<PlaylistEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PlaylistEntry::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extended_m3u() {
        let text = "#EXTM3U\r\n\
                    #EXTINF:123,Daft Punk - One More Time\r\n\
                    /music/one.mp3\r\n\
                    \r\n\
                    #EXTINF:-1,Radio\r\n\
                    http://radio.example/stream parseUrl=1\r\n\
                    #EXTGRP:ignored\r\n\
                    /music/bare.flac\r\n";
        let entries = parse_m3u(text);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].file, "/music/one.mp3");
        assert_eq!(entries[0].artist.as_deref(), Some("Daft Punk"));
        assert_eq!(entries[0].title.as_deref(), Some("One More Time"));
        assert_eq!(entries[0].duration, Some(Duration::from_secs(123)));

        assert_eq!(entries[1].file, "http://radio.example/stream");
        assert_eq!(entries[1].title.as_deref(), Some("Radio"));
        assert_eq!(entries[1].duration, None);

        assert_eq!(entries[2], PlaylistEntry::new("/music/bare.flac"));
    }

    #[test]
    fn test_stream_inf_entries() {
        let text = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1280000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2560000\nhigh.m3u8\n";
        let files: Vec<String> = parse_m3u(text).into_iter().map(|e| e.file).collect();
        assert_eq!(files, vec!["low.m3u8", "high.m3u8"]);
    }

    #[test]
    fn test_n_entries_survive() {
        let mut text = String::from("#EXTM3U\n");
        for n in 0..25 {
            text.push_str(&format!("#EXTINF:{n},Artist {n} - Song {n}\n/music/{n}.mp3\n"));
        }
        let entries = parse_m3u(&text);
        assert_eq!(entries.len(), 25);
        assert_eq!(entries[24].title.as_deref(), Some("Song 24"));
    }

    #[test]
    fn test_out_of_range_durations_are_unknown() {
        let text = "#EXTM3U\n#EXTINF:1e30,Big - Song\n/a.mp3\n#EXTINF:NaN,Odd - Song\n/b.mp3\n";
        let entries = parse_m3u(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].duration, None);
        assert_eq!(entries[0].title.as_deref(), Some("Song"));
        assert_eq!(entries[1].duration, None);
    }

    #[test]
    fn test_plain_text() {
        let entries = parse_text("/a.mp3\n\n# comment\n  /b.mp3  \n");
        assert_eq!(entries, vec![PlaylistEntry::new("/a.mp3"), PlaylistEntry::new("/b.mp3")]);
    }
}
