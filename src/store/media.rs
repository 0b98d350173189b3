//! Media storage directory with content-addressed file names.
//!
//! A URL always maps to the same file: `<sha256(url) hex><.ext>`, where the
//! extension is taken from the URL path. Re-running against the same message
//! therefore finds the files downloaded last time.
//!
//! Two distinct URLs share a file only on a SHA-256 collision, which is
//! treated as impossible.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{EmbedError, Result};
use crate::model::media::MediaReference;

/// Longest URL extension kept in a storage file name.
const MAX_EXTENSION_LEN: usize = 8;

/// Directory holding downloaded and converted media.
#[derive(Debug, Clone)]
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    /// Open the store, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| EmbedError::MediaDir {
            path: dir.clone(),
            source: e,
        })?;
        debug!(dir = %dir.display(), "Media store ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Storage path for a URL.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(file_name_for(url))
    }

    /// Build the reference record for a URL.
    pub fn reference_for(&self, url: &str) -> MediaReference {
        MediaReference {
            url: url.to_string(),
            path: self.path_for(url),
        }
    }
}

/// Hex SHA-256 of a URL.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File name for a URL: hash plus the URL path's extension, if usable.
pub fn file_name_for(url: &str) -> String {
    let hash = url_hash(url);
    match url_extension(url) {
        Some(ext) => format!("{hash}.{ext}"),
        None => hash,
    }
}

/// Extension of the URL path (query and fragment ignored).
///
/// Returns `None` for missing, overlong, or non-alphanumeric extensions so
/// that the file name stays safe on every platform.
pub fn url_extension(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let ext = Path::new(&path).extension()?.to_str()?;
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_string())
}

/// Size of an existing, non-empty file.
pub fn existing_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file() && m.len() > 0)
        .map(|m| m.len())
}
