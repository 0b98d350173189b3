//! Centralized error types for embedmail.
//!
//! Two families exist. [`EmbedError`] is fatal for the message being
//! processed (and, unless `keep_going` is set, for the whole batch).
//! [`MediaError`] describes a failure tied to a single remote URL; it is
//! logged where it is detected and the affected reference stays untouched.

use std::path::PathBuf;
use std::time::Duration;

use humansize::{format_size, BINARY};
use thiserror::Error;

/// Fatal errors produced by the embedmail library.
#[derive(Error, Debug)]
pub enum EmbedError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified container file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file could not be parsed as an email message.
    #[error("Cannot parse email: {0}")]
    InvalidMessage(PathBuf),

    /// The media storage directory could not be created.
    #[error("Cannot create media directory '{path}': {source}")]
    MediaDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The HTML body could not be parsed or serialized.
    #[error("HTML error: {0}")]
    Html(String),

    /// The rewritten message could not be serialized.
    #[error("Cannot generate eml: {0}")]
    Serialize(String),

    /// No input files were given and none matched the default pattern.
    #[error("No .eml file given")]
    NoInput,

    /// The HTTP client could not be constructed.
    #[error("Cannot create HTTP client: {0}")]
    HttpClient(String),
}

/// Convenience alias for `Result<T, EmbedError>`.
pub type Result<T> = std::result::Result<T, EmbedError>;

impl EmbedError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `EmbedError::io`).
impl From<std::io::Error> for EmbedError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

/// Recoverable failure for one remote media URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The fetch did not complete within its deadline.
    #[error("fetching {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// The server answered with a non-success status.
    #[error("response status code {status} invalid for {url}")]
    Status { url: String, status: u16 },

    /// Fewer bytes were written than the server declared.
    #[error("expected {} but downloaded {} from {url}", format_size(*.expected, BINARY), format_size(*.written, BINARY))]
    ShortRead {
        url: String,
        expected: u64,
        written: u64,
    },

    /// Local file system error while storing or reading media.
    #[error("I/O error on '{path}': {reason}")]
    Io { path: PathBuf, reason: String },

    /// The content type of the file could not be determined.
    #[error("cannot detect media type of '{path}'")]
    Undetectable { path: PathBuf },

    /// The file is not an image or a video.
    #[error("mime of {url} is {mime} instead of image or video")]
    Unsupported { url: String, mime: String },

    /// No downloaded media exists for the URL.
    #[error("missing local file of {0}")]
    Missing(String),

    /// The media could not be attached to the message.
    #[error("cannot attach '{path}': {reason}")]
    Attach { path: PathBuf, reason: String },

    /// The external conversion tool failed.
    #[error("convert '{path}' failed: {reason}")]
    Transcode { path: PathBuf, reason: String },

    /// The external conversion tool did not finish in time.
    #[error("convert '{path}' timed out after {after:?}")]
    TranscodeTimeout { path: PathBuf, after: Duration },
}

impl MediaError {
    /// Short machine-friendly label, used when marking missing references.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Timeout { .. } => "timeout",
            Self::Status { .. } => "status",
            Self::ShortRead { .. } => "short-read",
            Self::Io { .. } => "io",
            Self::Undetectable { .. } => "undetectable",
            Self::Unsupported { .. } => "unsupported",
            Self::Missing(_) => "missing",
            Self::Attach { .. } => "attach",
            Self::Transcode { .. } | Self::TranscodeTimeout { .. } => "transcode",
        }
    }
}
