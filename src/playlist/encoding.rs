use chardetng::EncodingDetector;
use encoding_rs::{Encoding, WINDOWS_1252};
use tracing::{debug, warn};

/// Decodifica los bytes de una playlist; nunca falla
///
/// Se prueban en orden: la etiqueta del llamador, el BOM, el encoding por
/// defecto del formato, la detección de `chardetng` y por último windows-1252.
/// Los cuatro primeros solo ganan si decodifican sin caracteres de reemplazo.
pub fn decode(
    data: &[u8],
    label: Option<&str>,
    format_default: Option<&'static Encoding>,
) -> (String, &'static Encoding) {
    if let Some(label) = label {
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) => {
                if let Some(text) = decode_clean(data, encoding) {
                    return (text, encoding);
                }
                warn!("⚠️ La playlist no es {} válido, detectando", encoding.name());
            }
            None => warn!("⚠️ Codificación desconocida '{}', detectando", label),
        }
    }

    if let Some((encoding, bom_length)) = Encoding::for_bom(data) {
        if let Some(text) = decode_clean(&data[bom_length..], encoding) {
            return (text, encoding);
        }
    }

    if let Some(encoding) = format_default {
        if let Some(text) = decode_clean(data, encoding) {
            return (text, encoding);
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(data, true);
    let guessed = detector.guess(None, true);
    if let Some(text) = decode_clean(data, guessed) {
        debug!("🔤 Codificación detectada: {}", guessed.name());
        return (text, guessed);
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(data);
    (text.into_owned(), WINDOWS_1252)
}

fn decode_clean(data: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(data)
        .map(|text| text.into_owned())
}
