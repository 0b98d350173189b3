//! Structured view of an email container.

/// A parsed message, reduced to what is needed to rebuild it.
///
/// Structural MIME headers (`Content-Type`, `Content-Transfer-Encoding`,
/// `MIME-Version`) are not kept; they are regenerated on serialization.
#[derive(Debug, Clone, Default)]
pub struct MailMessage {
    /// Top-level headers in original order, as `(name, raw value)`.
    /// Folded values keep their line breaks.
    pub headers: Vec<(String, String)>,

    /// Plain-text body, if the message has one.
    pub text: Option<String>,

    /// HTML body, if the message has one.
    pub html: Option<String>,

    /// Attachments and inline parts, existing ones first.
    pub parts: Vec<MessagePart>,
}

/// A non-body MIME part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    /// Full MIME type, e.g. `image/png`.
    pub content_type: String,

    /// Content-ID without angle brackets.
    pub content_id: Option<String>,

    /// File name from `Content-Disposition`/`Content-Type`.
    pub filename: Option<String>,

    /// `true` if the part is referenced by the HTML body (multipart/related).
    pub html_related: bool,

    /// Additional headers written on the part.
    pub headers: Vec<(String, String)>,

    /// Decoded content.
    pub contents: Vec<u8>,
}

impl MailMessage {
    /// First value of a header, case-insensitive, with folding removed.
    pub fn header(&self, name: &str) -> Option<String> {
        crate::parser::header::get_header(&self.headers, name)
    }

    /// Inline parts referenced from the HTML body.
    pub fn related_parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts.iter().filter(|p| p.html_related)
    }

    /// Regular attachments.
    pub fn attachments(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts.iter().filter(|p| !p.html_related)
    }
}
