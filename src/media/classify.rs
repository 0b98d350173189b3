//! Content-type detection from file contents.
//!
//! Image formats are recognised by `image::guess_format`; video containers
//! and a few text formats that servers commonly return instead of media
//! (error pages) are matched against a small magic-byte table.

use std::io::Read;
use std::path::Path;

use image::ImageFormat;

use crate::error::MediaError;

/// Bytes read from the start of a file for detection.
const SNIFF_LEN: usize = 512;

/// Detected content type of a media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub mime: &'static str,
    pub extension: &'static str,
}

impl Classification {
    /// Only images and videos may be embedded.
    pub fn is_embeddable(&self) -> bool {
        is_embeddable(self.mime)
    }
}

pub fn is_embeddable(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("video/")
}

/// Classify a file on disk by its leading bytes.
pub fn classify_file(path: &Path) -> Result<Classification, MediaError> {
    let mut file = std::fs::File::open(path).map_err(|e| MediaError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| MediaError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    classify_bytes(&head).ok_or_else(|| MediaError::Undetectable {
        path: path.to_path_buf(),
    })
}

/// Classify a byte prefix. Returns `None` when nothing matches.
pub fn classify_bytes(head: &[u8]) -> Option<Classification> {
    if head.is_empty() {
        return None;
    }
    if let Ok(format) = image::guess_format(head) {
        if let Some(found) = image_classification(format) {
            return Some(found);
        }
    }
    if let Some(found) = video_classification(head) {
        return Some(found);
    }
    text_classification(head)
}

fn image_classification(format: ImageFormat) -> Option<Classification> {
    let (mime, extension) = match format {
        ImageFormat::Png => ("image/png", "png"),
        ImageFormat::Jpeg => ("image/jpeg", "jpg"),
        ImageFormat::Gif => ("image/gif", "gif"),
        ImageFormat::WebP => ("image/webp", "webp"),
        ImageFormat::Bmp => ("image/bmp", "bmp"),
        ImageFormat::Ico => ("image/x-icon", "ico"),
        ImageFormat::Tiff => ("image/tiff", "tiff"),
        ImageFormat::Avif => ("image/avif", "avif"),
        _ => return None,
    };
    Some(Classification { mime, extension })
}

fn video_classification(head: &[u8]) -> Option<Classification> {
    // ISO base media: "ftyp" box at offset 4, brand at 8..12.
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        let found = match &head[8..12] {
            b"qt  " => Classification {
                mime: "video/quicktime",
                extension: "mov",
            },
            b"avif" | b"avis" => Classification {
                mime: "image/avif",
                extension: "avif",
            },
            _ => Classification {
                mime: "video/mp4",
                extension: "mp4",
            },
        };
        return Some(found);
    }
    if head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some(Classification {
            mime: "video/webm",
            extension: "webm",
        });
    }
    if head.starts_with(b"OggS") {
        return Some(Classification {
            mime: "video/ogg",
            extension: "ogv",
        });
    }
    None
}

fn text_classification(head: &[u8]) -> Option<Classification> {
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    let lower = trimmed
        .get(..trimmed.len().min(64))
        .unwrap_or(trimmed)
        .to_ascii_lowercase();

    if lower.starts_with("<svg") || (lower.starts_with("<?xml") && text.contains("<svg")) {
        return Some(Classification {
            mime: "image/svg+xml",
            extension: "svg",
        });
    }
    if lower.starts_with("<!doctype html") || lower.starts_with("<html") || lower.starts_with("<head")
    {
        return Some(Classification {
            mime: "text/html",
            extension: "html",
        });
    }
    if lower.starts_with("<?xml") {
        return Some(Classification {
            mime: "text/xml",
            extension: "xml",
        });
    }
    if lower.starts_with('{') || lower.starts_with('[') {
        return Some(Classification {
            mime: "application/json",
            extension: "json",
        });
    }
    if std::str::from_utf8(head).is_ok() && !head.contains(&0) {
        return Some(Classification {
            mime: "text/plain",
            extension: "txt",
        });
    }
    None
}
