//! Parser for `.eml` container files (RFC 5322 messages).

use std::collections::BTreeSet;
use std::path::Path;

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use crate::error::{EmbedError, Result};
use crate::model::message::{MailMessage, MessagePart};
use crate::parser::header;

/// Read and parse a single `.eml` file.
pub fn parse_eml(path: impl AsRef<Path>) -> Result<MailMessage> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EmbedError::FileNotFound(path.to_path_buf())
        } else {
            EmbedError::io(path, e)
        }
    })?;

    parse_message(&data).ok_or_else(|| EmbedError::InvalidMessage(path.to_path_buf()))
}

/// Parse raw message bytes into a [`MailMessage`].
///
/// Returns `None` when `mail-parser` cannot make sense of the input.
pub fn parse_message(raw: &[u8]) -> Option<MailMessage> {
    let parser = MessageParser::default();
    let msg = parser.parse(raw)?;

    let header_end = header::find_header_end(raw).unwrap_or(raw.len());
    let headers = header::split_raw_headers(&header::decode_header_bytes(&raw[..header_end]))
        .into_iter()
        .filter(|(name, _)| !header::is_structural(name))
        .collect();

    let text = primary_body(&msg, &msg.text_body, false);
    let html = primary_body(&msg, &msg.html_body, true);
    let primary = [text.as_ref(), html.as_ref()].map(|body| body.map(|(id, _)| *id));

    // Further inline text/html parts (multipart/mixed) travel with the attachments.
    let extra_bodies = msg
        .text_body
        .iter()
        .chain(&msg.html_body)
        .copied()
        .filter(|id| !primary.contains(&Some(*id)))
        .filter(|&id| {
            msg.parts
                .get(id)
                .is_some_and(|p| matches!(p.body, PartType::Text(_) | PartType::Html(_)))
        });
    let ids: BTreeSet<usize> = msg.attachments.iter().copied().chain(extra_bodies).collect();
    let parts = ids
        .into_iter()
        .filter_map(|id| msg.parts.get(id))
        .map(part_from_parsed)
        .collect();

    Some(MailMessage {
        headers,
        text: text.map(|(_, body)| body),
        html: html.map(|(_, body)| body),
        parts,
    })
}

/// First entry of a body list, if its part really has the wanted type.
///
/// mail-parser fills a missing alternative with the other body (text for
/// html and the reverse); those entries are not bodies of that kind.
fn primary_body(msg: &Message<'_>, ids: &[usize], html: bool) -> Option<(usize, String)> {
    let id = *ids.first()?;
    match &msg.parts.get(id)?.body {
        PartType::Text(text) if !html => Some((id, text.to_string())),
        PartType::Html(body) if html => Some((id, body.to_string())),
        _ => None,
    }
}

/// Build a [`MessagePart`] from an attachment of a parsed message.
fn part_from_parsed(part: &mail_parser::MessagePart<'_>) -> MessagePart {
    let content_type = part
        .content_type()
        .map(|ct| {
            let main = ct.ctype();
            match ct.subtype() {
                Some(sub) => format!("{main}/{sub}"),
                None => main.to_string(),
            }
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let content_id = part
        .content_id()
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|id| !id.is_empty());

    let disposition_inline = part
        .content_disposition()
        .map(|d| d.ctype().eq_ignore_ascii_case("inline"));

    // Parts with a Content-ID that are not explicitly attachments belong to the HTML.
    let html_related = content_id.is_some() && disposition_inline.unwrap_or(true);

    let mut headers = Vec::new();
    if let Some(location) = part.content_location() {
        headers.push(("Content-Location".to_string(), location.to_string()));
    }

    MessagePart {
        content_type,
        content_id,
        filename: part.attachment_name().map(String::from),
        html_related,
        headers,
        contents: part.contents().to_vec(),
    }
}
