//! Reference extraction: find the remote media a document points at.

use std::collections::HashSet;

use tracing::{debug, warn};
use url::Url;

use crate::model::media::MediaReference;
use crate::parser::html::{HtmlDocument, MEDIA_TAGS};
use crate::store::media::MediaStore;

/// What a `src` value points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SrcKind {
    Empty,
    /// `data:` URI, already inline.
    Inline,
    /// `cid:` reference, already embedded.
    Embedded,
    /// Absolute `http`/`https` URL.
    Remote,
    /// Relative or scheme-relative reference.
    Relative,
    /// Any other scheme.
    Unsupported(String),
}

/// Classify a `src` attribute value.
pub fn classify_src(src: &str) -> SrcKind {
    let src = src.trim();
    if src.is_empty() {
        return SrcKind::Empty;
    }
    let lower = src
        .get(..src.len().min(8))
        .unwrap_or(src)
        .to_ascii_lowercase();
    if lower.starts_with("data:") {
        SrcKind::Inline
    } else if lower.starts_with("cid:") {
        SrcKind::Embedded
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        SrcKind::Remote
    } else if src.starts_with("//") {
        SrcKind::Relative
    } else {
        match Url::parse(src) {
            Ok(parsed) => SrcKind::Unsupported(parsed.scheme().to_string()),
            Err(_) => SrcKind::Relative,
        }
    }
}

/// Rewrite relative `src` values against the message's `Content-Base`.
///
/// Returns the number of attributes changed. An unusable base changes nothing.
pub fn resolve_relative<D: HtmlDocument>(doc: &D, base: &str) -> usize {
    // Header folding may have introduced whitespace inside the URL.
    let base: String = base.split_whitespace().collect();
    let base = match Url::parse(&base) {
        Ok(url) => url,
        Err(e) => {
            warn!(base = %base, error = %e, "Ignoring invalid content-base");
            return 0;
        }
    };

    let mut resolved = 0;
    for element in doc.select_tags(MEDIA_TAGS) {
        let Some(src) = doc.attr(&element, "src") else {
            continue;
        };
        if classify_src(&src) != SrcKind::Relative {
            continue;
        }
        match base.join(src.trim()) {
            Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => {
                debug!(src = %src, resolved = %absolute, "Resolved relative reference");
                doc.set_attr(&element, "src", absolute.as_str());
                resolved += 1;
            }
            Ok(_) => {}
            Err(e) => debug!(src = %src, error = %e, "Cannot resolve relative reference"),
        }
    }
    resolved
}

/// Collect the distinct remote media URLs of a document, in order of first
/// appearance, with their storage paths.
pub fn extract_references<D: HtmlDocument>(doc: &D, store: &MediaStore) -> Vec<MediaReference> {
    let mut seen = HashSet::new();
    let mut references = Vec::new();

    for element in doc.select_tags(MEDIA_TAGS) {
        let Some(src) = doc.attr(&element, "src") else {
            continue;
        };
        if classify_src(&src) != SrcKind::Remote {
            continue;
        }
        if seen.insert(src.clone()) {
            references.push(store.reference_for(&src));
        }
    }
    references
}
