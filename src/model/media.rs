//! Remote media records shared by the fetch, classify, attach and rewrite stages.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::MediaError;

/// One unique remote URL found in a document, with the local path its
/// content is stored under.
///
/// Several elements may point at the same URL; they all share one
/// `MediaReference` (the extractor coalesces them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    /// Absolute `http`/`https` URL, as written in the document.
    pub url: String,
    /// Deterministic storage location for the downloaded bytes.
    pub path: PathBuf,
}

/// Outcome of fetching one unique URL.
///
/// Created once by the download coordinator and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Source URL.
    pub url: String,
    /// Local file holding the payload.
    pub path: PathBuf,
    /// Success payload, or the reason this URL could not be fetched.
    pub outcome: std::result::Result<Downloaded, MediaError>,
}

/// Metadata of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// MIME type declared by the server, if any. Not trusted for embedding.
    pub declared_mime: Option<String>,
    /// Size in bytes of the local file.
    pub content_length: u64,
    /// Server `Last-Modified`, or the local file modification time.
    pub last_modified: Option<DateTime<Utc>>,
    /// `true` when an existing local file was reused without downloading the body.
    pub reused: bool,
}

impl DownloadResult {
    /// `true` if the fetch succeeded.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Canonical record for one embeddable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    /// Canonical URL; the cache key.
    pub url: String,
    /// Local storage path.
    pub path: PathBuf,
    /// Classified MIME type (`image/*` or `video/*`).
    pub mime: String,
    /// Canonical file extension for the MIME type, without the dot.
    pub extension: String,
    /// Modification time carried into the `Last-Modified` attachment header.
    pub modified: Option<DateTime<Utc>>,
}

/// Token binding a `cid:` reference to an inline attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value to place in a `src` attribute.
    pub fn to_src(&self) -> String {
        format!("cid:{}", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-message map from canonical URL to [`Media`].
///
/// Owned by one message's pipeline run and dropped with it.
#[derive(Debug, Default)]
pub struct MediaCache {
    entries: HashMap<String, Media>,
}

impl MediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. An existing record for the same URL is kept and the
    /// new one is returned back as `Err`.
    pub fn insert(&mut self, media: Media) -> std::result::Result<(), Media> {
        if self.entries.contains_key(&media.url) {
            return Err(media);
        }
        self.entries.insert(media.url.clone(), media);
        Ok(())
    }

    pub fn get(&self, url: &str) -> Option<&Media> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
