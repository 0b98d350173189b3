//! Document rewriting: point media references at inline attachments.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::extract::{classify_src, SrcKind};
use crate::config::MissingPolicy;
use crate::error::MediaError;
use crate::export::attachment::AttachmentBuilder;
use crate::model::media::MediaCache;
use crate::model::message::MailMessage;
use crate::parser::html::{HtmlDocument, MEDIA_TAGS};

/// Attribute set on references that could not be embedded under [`MissingPolicy::Mark`].
pub const MISSING_ATTR: &str = "data-embed-missing";

/// Hints that no longer apply once the content is inline.
const STRIPPED_ATTRS: &[&str] = &["loading", "srcset", "sizes"];

/// Everything the rewriter reads besides the document.
pub struct RewriteContext<'a> {
    /// Embeddable media by canonical URL.
    pub media: &'a MediaCache,
    /// Why a URL has no media, when known.
    pub failures: &'a HashMap<String, MediaError>,
    pub on_missing: MissingPolicy,
}

/// Counters for one rewrite pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// References now pointing at a `cid:`.
    pub rewritten: usize,
    /// Remote references left unchanged.
    pub missing: usize,
    /// `data:`/`cid:`/empty references.
    pub skipped: usize,
    /// References with a scheme or form that cannot be embedded.
    pub unsupported: usize,
}

/// Walk all media elements in document order and rewrite their `src`.
pub fn rewrite_references<D: HtmlDocument>(
    doc: &D,
    message: &mut MailMessage,
    attachments: &mut AttachmentBuilder,
    ctx: &RewriteContext<'_>,
) -> RewriteStats {
    let mut stats = RewriteStats::default();

    for element in doc.select_tags(MEDIA_TAGS) {
        for name in STRIPPED_ATTRS {
            doc.remove_attr(&element, name);
        }
        for name in ["width", "height"] {
            if doc.attr(&element, name).is_some_and(|v| v.trim() == "0") {
                doc.remove_attr(&element, name);
            }
        }

        let Some(src) = doc.attr(&element, "src") else {
            continue;
        };

        match classify_src(&src) {
            SrcKind::Empty | SrcKind::Inline | SrcKind::Embedded => stats.skipped += 1,
            SrcKind::Relative => {
                debug!(src = %src, "Relative reference without usable base");
                stats.unsupported += 1;
            }
            SrcKind::Unsupported(scheme) => {
                warn!(src = %src, scheme = %scheme, "Unsupported media reference");
                stats.unsupported += 1;
            }
            SrcKind::Remote => {
                let resolved = match ctx.media.get(&src) {
                    Some(media) => attachments.resolve(message, media).inspect_err(|e| {
                        warn!(url = %src, error = %e, "Cannot attach media");
                    }),
                    None => Err(ctx
                        .failures
                        .get(&src)
                        .cloned()
                        .unwrap_or_else(|| MediaError::Missing(src.clone()))),
                };

                match resolved {
                    Ok(cid) => {
                        doc.set_attr(&element, "src", &cid.to_src());
                        stats.rewritten += 1;
                    }
                    Err(e) => {
                        debug!(url = %src, reason = %e, "Reference left unchanged");
                        if ctx.on_missing == MissingPolicy::Mark {
                            doc.set_attr(&element, MISSING_ATTR, e.kind());
                        }
                        stats.missing += 1;
                    }
                }
            }
        }
    }
    stats
}
