//! Message normalizer — raw Gmail payload to a flat spreadsheet record.
//!
//! Pure transformation, no I/O. Anything malformed degrades to a
//! best-effort string rather than failing the record; only an absent
//! payload yields `None`.

use base64::Engine;

use crate::google::gmail::{MessagePart, RawMessage};

/// Display format for parsed dates.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A normalized email, one row in the sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailRecord {
    pub id: String,
    pub from: String,
    pub subject: String,
    /// Formatted date when the header parsed, raw header string otherwise.
    pub date: String,
    pub body: String,
}

/// Normalize a raw message. Returns `None` when there is no payload to
/// extract anything from.
pub fn parse_message(msg: &RawMessage) -> Option<EmailRecord> {
    let payload = msg.payload.as_ref()?;

    let from = decode_header_value(&header_value(payload, "From"));
    let subject = decode_header_value(&header_value(payload, "Subject"));
    let raw_date = header_value(payload, "Date");
    let date = format_date(&raw_date).unwrap_or(raw_date);

    let mut body = String::new();
    collect_body_text(payload, &mut body);
    let body = collapse_whitespace(&body);

    Some(EmailRecord {
        id: msg.id.clone(),
        from,
        subject,
        date,
        body,
    })
}

/// First header matching `name`, case-insensitive. Gmail emits canonical
/// case but originals vary.
fn header_value(payload: &MessagePart, name: &str) -> String {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
        .unwrap_or_default()
}

/// Decode RFC 2047 encoded-words (e.g. `=?utf-8?Q?Caf=C3=A9?=`) in a
/// header value. Falls back to the raw string if decoding fails.
fn decode_header_value(raw: &str) -> String {
    // Fast path: no encoded-word marker present
    if !raw.contains("=?") {
        return raw.to_string();
    }
    // Build a synthetic header so mailparse can decode it
    let synthetic = format!("X: {}", raw);
    match mailparse::parse_header(synthetic.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => raw.to_string(),
    }
}

/// Walk the MIME part tree in presented order, concatenating text/plain
/// verbatim and text/html as stripped text.
fn collect_body_text(part: &MessagePart, out: &mut String) {
    match part.mime_type.as_str() {
        "text/plain" => {
            if let Some(text) = decode_part_data(part) {
                out.push_str(&text);
                out.push(' ');
            }
        }
        "text/html" => {
            if let Some(html) = decode_part_data(part) {
                if let Ok(text) = html2text::from_read(html.as_bytes(), 120) {
                    out.push_str(&text);
                    out.push(' ');
                }
            }
        }
        _ => {}
    }
    for child in &part.parts {
        collect_body_text(child, out);
    }
}

/// Decode a part's URL-safe base64 body data. Gmail emits unpadded
/// base64url; padded input is accepted too.
fn decode_part_data(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a Date header permissively and reformat for display.
///
/// Accepts RFC 2822 (with or without a trailing "(UTC)" comment) and
/// RFC 3339. Returns `None` when nothing matches so the caller can fall
/// back to the raw string.
fn format_date(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Strip a trailing zone comment like " (UTC)" that rfc2822 parsers reject
    let cleaned = match trimmed.find(" (") {
        Some(idx) => trimmed[..idx].trim_end(),
        None => trimmed,
    };

    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.format(DATE_FORMAT).to_string());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.format(DATE_FORMAT).to_string());
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
