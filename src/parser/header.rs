//! Raw header handling: splitting, unfolding, lookup and HTTP dates.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

/// Header names regenerated by the message builder; never copied through.
const STRUCTURAL_HEADERS: &[&str] = &[
    "content-type",
    "content-transfer-encoding",
    "content-disposition",
    "content-id",
    "mime-version",
];

/// Obsolete HTTP-date forms (RFC 850 and asctime), tried after RFC 2822.
const LEGACY_HTTP_DATES: &[&str] = &["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Byte offset of the blank line separating headers from the body.
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    let lf = data.windows(2).position(|w| w == b"\n\n");
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Decode a header block. Invalid UTF-8 is read as Windows-1252.
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// Split a header block into `(name, raw_value)` pairs.
///
/// Continuation lines stay attached to their header, joined with `\r\n`, so
/// values are written back wrapped the way they arrived.
pub fn split_raw_headers(text: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push_str("\r\n");
                value.push_str(line.trim_end());
            }
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if !name.is_empty() {
            headers.push((name.to_string(), value.trim().to_string()));
        }
    }
    headers
}

/// Remove folding from a raw header value.
pub fn unfold_value(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `true` for headers that describe the MIME structure of the message.
pub fn is_structural(name: &str) -> bool {
    STRUCTURAL_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// First value of a header (case-insensitive), unfolded.
pub fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| unfold_value(v))
}

/// Format a timestamp as an HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP `Last-Modified`/`Date` value.
///
/// Accepts the IMF-fixdate (and anything RFC 2822 allows), the obsolete
/// RFC 850 and asctime forms, and RFC 3339 as sent by some object stores.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in LEGACY_HTTP_DATES {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }

    debug!(date = value, "Unrecognized date");
    None
}
