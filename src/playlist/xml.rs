//! XSPF and property-list playlists.

use quick_xml::{escape::resolve_predefined_entity, events::Event, Reader};
use std::time::Duration;

use super::{PlaylistEntry, PlaylistError};

/// Árbol mínimo de elementos; ambos dialectos XML caben enteros en memoria
#[derive(Debug, Default)]
struct Element {
    name: String,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn named(name: &[u8]) -> Self {
        Self {
            name: String::from_utf8_lossy(name).into_owned(),
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }

    fn text(&self) -> Option<String> {
        let text = self.text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

fn read_tree(text: &str) -> Result<Element, PlaylistError> {
    let mut reader = Reader::from_str(text);
    let mut stack = vec![Element::default()];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(Element::named(e.local_name().as_ref())),
            Event::Empty(e) => {
                let element = Element::named(e.local_name().as_ref());
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(element);
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(PlaylistError::MissingElement("root"))?;
                let parent = stack.last_mut().ok_or(PlaylistError::MissingElement("root"))?;
                parent.children.push(element);
            }
            Event::Text(e) => {
                let decoded = e.decode().map_err(quick_xml::Error::from)?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&decoded);
                }
            }
            Event::CData(e) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::GeneralRef(e) => {
                let resolved = match e.resolve_char_ref()? {
                    Some(ch) => Some(ch.to_string()),
                    None => {
                        let name = e.decode().map_err(quick_xml::Error::from)?;
                        resolve_predefined_entity(&name).map(str::to_string)
                    }
                };
                if let (Some(resolved), Some(current)) = (resolved, stack.last_mut()) {
                    current.text.push_str(&resolved);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    // Una etiqueta sin cerrar deja más de un elemento en la pila
    match stack.pop() {
        Some(mut document) if stack.is_empty() => document
            .children
            .pop()
            .ok_or(PlaylistError::MissingElement("root")),
        _ => Err(PlaylistError::MissingElement("root")),
    }
}

/// Analiza un documento XSPF (`playlist/trackList/track`)
///
/// `duration` va en milisegundos. Los tracks sin `location` se ignoran.
pub fn parse_xspf(text: &str) -> Result<Vec<PlaylistEntry>, PlaylistError> {
    let root = read_tree(text)?;
    if root.name != "playlist" {
        return Err(PlaylistError::MissingElement("playlist"));
    }
    let track_list = root
        .child("trackList")
        .ok_or(PlaylistError::MissingElement("trackList"))?;

    Ok(track_list
        .children_named("track")
        .filter_map(|track| {
            let field = |name: &str| track.child(name).and_then(Element::text);
            let file = field("location")?;
            Some(PlaylistEntry {
                artist: field("creator"),
                title: field("title"),
                album: field("album"),
                name: None,
                duration: field("duration")
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .map(Duration::from_millis),
                file,
            })
        })
        .collect())
}

/// Analiza una property list al estilo iTunes
///
/// Los tracks son los diccionarios dentro del primer diccionario del
/// diccionario raíz (`Tracks`). `Total Time` va en milisegundos y `Location`
/// se decodifica de porcentajes.
pub fn parse_plist(text: &str) -> Result<Vec<PlaylistEntry>, PlaylistError> {
    let root = read_tree(text)?;
    let library = root
        .child("dict")
        .ok_or(PlaylistError::MissingElement("dict"))?;
    let tracks = library
        .child("dict")
        .ok_or(PlaylistError::MissingElement("Tracks"))?;

    Ok(tracks
        .children_named("dict")
        .filter_map(|track| {
            let mut entry = PlaylistEntry::default();
            let mut children = track.children.iter();
            while let Some(key) = children.next() {
                if key.name != "key" {
                    continue;
                }
                let Some(value) = children.next() else { break };
                let Some(text) = value.text() else { continue };
                match key.text.trim() {
                    "Artist" => entry.artist = Some(text),
                    "Name" => entry.title = Some(text),
                    "Album" => entry.album = Some(text),
                    "Total Time" => {
                        entry.duration = text.parse::<u64>().ok().map(Duration::from_millis)
                    }
                    "Location" => {
                        entry.file = urlencoding::decode(&text)
                            .map(|decoded| decoded.into_owned())
                            .unwrap_or(text)
                    }
                    _ => {}
                }
            }
            (!entry.file.is_empty()).then_some(entry)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn xspf(tracks: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<playlist version="1" xmlns="http://xspf.org/ns/0/">
  <title>Mix</title>
  <trackList>{tracks}</trackList>
</playlist>"#
        )
    }

    #[test]
    fn test_xspf_fields() {
        let text = xspf(
            r#"<track>
                 <location>file:///music/rock.mp3</location>
                 <title>Rock &amp; Roll</title>
                 <creator>Led Zeppelin</creator>
                 <album><![CDATA[IV]]></album>
                 <duration>220000</duration>
               </track>
               <track><title>No location</title></track>"#,
        );
        let entries = parse_xspf(&text).unwrap();
        assert_eq!(
            entries,
            vec![PlaylistEntry {
                artist: Some("Led Zeppelin".into()),
                title: Some("Rock & Roll".into()),
                album: Some("IV".into()),
                name: None,
                duration: Some(Duration::from_secs(220)),
                file: "file:///music/rock.mp3".into(),
            }]
        );
    }

    #[test]
    fn test_xspf_n_entries() {
        let tracks: String = (0..12)
            .map(|n| format!("<track><location>/m/{n}.ogg</location><title>T{n}</title></track>"))
            .collect();
        assert_eq!(parse_xspf(&xspf(&tracks)).unwrap().len(), 12);
    }

    #[test]
    fn test_xspf_requires_track_list() {
        assert!(matches!(
            parse_xspf(r#"<playlist version="1"></playlist>"#),
            Err(PlaylistError::MissingElement("trackList"))
        ));
    }

    fn plist(tracks: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Major Version</key><integer>1</integer>
  <key>Tracks</key>
  <dict>{tracks}</dict>
  <key>Playlists</key><array/>
</dict>
</plist>"#
        )
    }

    #[test]
    fn test_plist_fields() {
        let text = plist(
            r#"<key>1001</key>
               <dict>
                 <key>Track ID</key><integer>1001</integer>
                 <key>Name</key><string>Clair de Lune</string>
                 <key>Artist</key><string>Debussy</string>
                 <key>Album</key><string>Suite bergamasque</string>
                 <key>Total Time</key><integer>300500</integer>
                 <key>Comments</key><string></string>
                 <key>Location</key><string>file://localhost/Music/Clair%20de%20Lune.m4a</string>
               </dict>"#,
        );
        let entries = parse_plist(&text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title.as_deref(), Some("Clair de Lune"));
        assert_eq!(entries[0].artist.as_deref(), Some("Debussy"));
        assert_eq!(entries[0].duration, Some(Duration::from_millis(300_500)));
        assert_eq!(entries[0].file, "file://localhost/Music/Clair de Lune.m4a");
    }

    #[test]
    fn test_plist_n_entries() {
        let tracks: String = (0..8)
            .map(|n| {
                format!("<key>{n}</key><dict><key>Name</key><string>S{n}</string><key>Location</key><string>/m/{n}.mp3</string></dict>")
            })
            .collect();
        assert_eq!(parse_plist(&plist(&tracks)).unwrap().len(), 8);
    }
}
