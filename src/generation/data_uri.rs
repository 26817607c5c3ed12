use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

pub const DEFAULT_MIME: &str = "image/png";

const PNG_SIGNATURE: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];
const JPEG_SIGNATURE: [u8; 3] = [0xFF, 0xD8, 0xFF];

/// Normalizes raw base64 or an existing data URI into a data URI.
///
/// Surrounding whitespace, quotes and a byte-order mark are stripped. Data
/// URIs pass through with line breaks removed; raw payloads must decode as
/// standard base64 and get their MIME type from the PNG or JPEG signature,
/// falling back to `default_mime`. Returns `None` for anything else.
pub fn make_data_uri(input: &str, default_mime: &str) -> Option<String> {
    let trimmed =
        input.trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '\u{feff}'));
    if trimmed.is_empty() {
        return None;
    }

    if trimmed
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
    {
        return Some(trimmed.replace(['\r', '\n'], ""));
    }

    let payload = trimmed.replace(['\r', '\n', ' '], "");
    let bytes = STANDARD.decode(&payload).ok()?;
    let mime = sniff_mime(&bytes).unwrap_or(default_mime);
    Some(format!("data:{mime};base64,{payload}"))
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() >= 8 && bytes.starts_with(&PNG_SIGNATURE) {
        Some("image/png")
    } else if bytes.starts_with(&JPEG_SIGNATURE) {
        Some("image/jpeg")
    } else {
        None
    }
}
