//! Attach downloaded media to a message as HTML-related inline parts.

use std::collections::HashMap;

use crate::error::MediaError;
use crate::model::media::{ContentId, Media};
use crate::model::message::{MailMessage, MessagePart};
use crate::parser::header::format_http_date;
use crate::store::media::url_hash;

/// Tracks which media of one message are already attached.
///
/// Each URL is attached at most once; later references reuse its CID.
#[derive(Debug, Default)]
pub struct AttachmentBuilder {
    attached: HashMap<String, ContentId>,
}

impl AttachmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the CID for `media`, attaching it to `message` on first use.
    pub fn resolve(
        &mut self,
        message: &mut MailMessage,
        media: &Media,
    ) -> Result<ContentId, MediaError> {
        if let Some(cid) = self.attached.get(&media.url) {
            return Ok(cid.clone());
        }

        let contents = std::fs::read(&media.path).map_err(|e| MediaError::Attach {
            path: media.path.clone(),
            reason: e.to_string(),
        })?;

        let cid = content_id_for(media);
        let mut headers = Vec::with_capacity(2);
        if let Some(modified) = &media.modified {
            headers.push(("Last-Modified".to_string(), format_http_date(modified)));
        }
        headers.push(("Content-Location".to_string(), media.url.clone()));

        message.parts.push(MessagePart {
            content_type: media.mime.clone(),
            content_id: Some(cid.as_str().to_string()),
            filename: Some(cid.as_str().to_string()),
            html_related: true,
            headers,
            contents,
        });

        tracing::debug!(url = %media.url, cid = %cid, "Attached media");
        self.attached.insert(media.url.clone(), cid.clone());
        Ok(cid)
    }

    /// Number of distinct media attached so far.
    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

/// CID of a media record: URL hash plus the extension of the detected type.
pub fn content_id_for(media: &Media) -> ContentId {
    ContentId::new(format!("{}.{}", url_hash(&media.url), media.extension))
}
