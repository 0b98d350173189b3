//! Serialize a [`MailMessage`] back to RFC 5322 bytes.
//!
//! The MIME tree is rebuilt from scratch:
//!
//! ```text
//! multipart/mixed            (only with regular attachments)
//! ├── multipart/alternative  (only with both text and HTML)
//! │   ├── text/plain
//! │   └── multipart/related  (only with inline parts)
//! │       ├── text/html
//! │       └── inline parts…
//! └── attachments…
//! ```

use mail_builder::headers::content_type::ContentType;
use mail_builder::headers::raw::Raw;
use mail_builder::mime::MimePart;
use mail_builder::MessageBuilder;

use crate::error::{EmbedError, Result};
use crate::model::message::{MailMessage, MessagePart};

/// Header names `mail-builder` looks up by exact case before generating defaults.
const CANONICAL_NAMES: &[&str] = &["Date", "Message-ID", "MIME-Version"];

/// Serialize a message, preserving its top-level headers in order.
pub fn write_message(message: &MailMessage) -> Result<Vec<u8>> {
    let mut builder = MessageBuilder::new();
    for (name, value) in &message.headers {
        builder = builder.header(canonical_name(name), Raw::new(value.trim().to_string()));
    }

    builder
        .body(body_tree(message))
        .write_to_vec()
        .map_err(|e| EmbedError::Serialize(e.to_string()))
}

fn body_tree(message: &MailMessage) -> MimePart<'static> {
    let html = message.html.as_ref().map(|html| {
        let html_part = MimePart::new("text/html", html.clone());
        let related: Vec<MimePart<'static>> = message.related_parts().map(inline_part).collect();
        if related.is_empty() {
            html_part
        } else {
            let mut children = Vec::with_capacity(related.len() + 1);
            children.push(html_part);
            children.extend(related);
            MimePart::new("multipart/related", children)
        }
    });
    let text = message
        .text
        .as_ref()
        .map(|text| MimePart::new("text/plain", text.clone()));

    let body = match (text, html) {
        (Some(text), Some(html)) => MimePart::new("multipart/alternative", vec![text, html]),
        (Some(text), None) => text,
        (None, Some(html)) => html,
        (None, None) => MimePart::new("text/plain", String::new()),
    };

    let attachments: Vec<MimePart<'static>> = message.attachments().map(attachment_part).collect();
    if attachments.is_empty() {
        return body;
    }
    let mut children = Vec::with_capacity(attachments.len() + 1);
    children.push(body);
    children.extend(attachments);
    MimePart::new("multipart/mixed", children)
}

/// Leaf part with its decoded contents. Text stays text so it is re-encoded as such.
fn leaf_part(part: &MessagePart) -> MimePart<'static> {
    let content_type = ContentType::new(part.content_type.clone());
    if part.content_type.starts_with("text/") {
        MimePart::new(
            content_type,
            String::from_utf8_lossy(&part.contents).into_owned(),
        )
    } else {
        MimePart::new(content_type, part.contents.clone())
    }
}

fn inline_part(part: &MessagePart) -> MimePart<'static> {
    let mut mime = leaf_part(part).inline();
    if let Some(cid) = &part.content_id {
        mime = mime.cid(cid.clone());
    }
    with_headers(mime, part)
}

fn attachment_part(part: &MessagePart) -> MimePart<'static> {
    let mut mime = match &part.filename {
        Some(name) => leaf_part(part).attachment(name.clone()),
        None => leaf_part(part).inline(),
    };
    if let Some(cid) = &part.content_id {
        mime = mime.cid(cid.clone());
    }
    with_headers(mime, part)
}

fn with_headers(mut mime: MimePart<'static>, part: &MessagePart) -> MimePart<'static> {
    for (name, value) in &part.headers {
        mime = mime.header(name.clone(), Raw::new(value.clone()));
    }
    mime
}

fn canonical_name(name: &str) -> String {
    CANONICAL_NAMES
        .iter()
        .find(|c| c.eq_ignore_ascii_case(name))
        .map(|c| c.to_string())
        .unwrap_or_else(|| name.to_string())
}
