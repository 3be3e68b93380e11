use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};
use tracing::debug;

use super::PlaylistEntry;

/// Analiza una playlist `.pls` de estilo INI
///
/// Las entradas se numeran `File1`, `Title1`, `Length1`... Puede haber huecos
/// en los índices; un índice sin `FileN` se ignora. Una duración negativa
/// significa desconocida.
pub fn parse_pls(text: &str) -> Vec<PlaylistEntry> {
    let mut fields: HashMap<(String, usize), String> = HashMap::new();
    let mut indices = BTreeSet::new();

    for line in text.lines().map(str::trim) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let Some((field, index)) = split_key(&key) else {
            continue;
        };
        indices.insert(index);
        fields.insert((field.to_string(), index), value.trim().to_string());
    }

    let mut entries = Vec::new();
    for index in indices {
        let field = |name: &str| fields.get(&(name.to_string(), index)).cloned();
        let Some(file) = field("file").filter(|file| !file.is_empty()) else {
            if field("title").is_some() || field("length").is_some() {
                debug!("Entrada PLS {} sin archivo, ignorada", index);
            }
            continue;
        };
        let duration = field("length")
            .and_then(|length| length.parse::<i64>().ok())
            .and_then(|seconds| u64::try_from(seconds).ok())
            .map(Duration::from_secs);

        let mut entry = PlaylistEntry::new(file).with_name(field("title"));
        entry.duration = duration;
        entries.push(entry);
    }
    entries
}

/// `file12` → (`file`, 12)
fn split_key(key: &str) -> Option<(&str, usize)> {
    let digits = key.find(|c: char| c.is_ascii_digit())?;
    let (field, index) = key.split_at(digits);
    match field {
        "file" | "title" | "length" => index.parse().ok().map(|index| (field, index)),
        _ => None,
    }
}
