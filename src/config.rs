//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$EMBEDMAIL_CONFIG` (environment variable)
//! 2. `~/.config/embedmail/config.toml` (Linux/macOS)
//!    `%APPDATA%\embedmail\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! Command-line flags are applied on top of the loaded file and the result is
//! flattened into [`EmbedOptions`], which is what the library consumes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Remote media fetching.
    pub download: DownloadConfig,
    /// GIF to video conversion.
    pub transcode: TranscodeConfig,
    /// Output file settings.
    pub output: OutputConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Continue with the next file after a fatal error on one file.
    pub keep_going: bool,
}

/// Remote media fetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory where downloaded media is stored.
    pub media_dir: PathBuf,
    /// Maximum number of simultaneous fetches.
    pub concurrency: usize,
    /// Deadline for a single fetch, in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header sent with every request.
    pub user_agent: String,
    /// Probe already-downloaded files with HEAD and reuse them when the size matches.
    pub reuse_existing: bool,
}

/// GIF to video conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Convert large animated GIFs into MP4 video.
    pub enabled: bool,
    /// Name or path of the ffmpeg executable.
    pub ffmpeg: PathBuf,
    /// Minimum GIF size in KiB before conversion is attempted.
    pub gif_threshold_kib: u64,
    /// Deadline for a single conversion, in seconds.
    pub timeout_secs: u64,
}

/// Output file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Suffix replacing `.eml` on output files.
    pub suffix: String,
    /// What to do with references whose media could not be embedded.
    pub on_missing: MissingPolicy,
}

/// Handling of references that cannot be embedded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Leave the original remote URL in place.
    #[default]
    Keep,
    /// Leave the URL and add a `data-embed-missing` attribute with the reason.
    Mark,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
            keep_going: false,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("media"),
            concurrency: 3,
            timeout_secs: 300,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            reuse_existing: true,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ffmpeg: PathBuf::from("ffmpeg"),
            gif_threshold_kib: 300,
            timeout_secs: 300,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            suffix: ".embed.eml".to_string(),
            on_missing: MissingPolicy::Keep,
        }
    }
}

/// Browser-like agent; some CDNs refuse requests without one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

// ── Resolved options ────────────────────────────────────────────

/// Fully resolved settings for one run of the pipeline.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    pub media_dir: PathBuf,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
    pub user_agent: String,
    pub reuse_existing: bool,
    pub transcode: TranscodeOptions,
    pub suffix: String,
    pub on_missing: MissingPolicy,
    pub keep_going: bool,
    /// Show an interactive progress bar while fetching.
    pub progress_bar: bool,
}

/// Resolved GIF conversion settings.
#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    pub enabled: bool,
    pub ffmpeg: PathBuf,
    pub gif_threshold: u64,
    pub timeout: Duration,
}

impl EmbedOptions {
    /// Flatten a [`Config`] into options.
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_dir: config.download.media_dir.clone(),
            concurrency: config.download.concurrency.max(1),
            fetch_timeout: Duration::from_secs(config.download.timeout_secs),
            user_agent: config.download.user_agent.clone(),
            reuse_existing: config.download.reuse_existing,
            transcode: TranscodeOptions {
                enabled: config.transcode.enabled,
                ffmpeg: config.transcode.ffmpeg.clone(),
                gif_threshold: config.transcode.gif_threshold_kib * 1024,
                timeout: Duration::from_secs(config.transcode.timeout_secs),
            },
            suffix: config.output.suffix.clone(),
            on_missing: config.output.on_missing,
            keep_going: config.general.keep_going,
            progress_bar: false,
        }
    }
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from the first location that has a file.
///
/// A missing file gives the defaults; an unreadable or invalid one is
/// reported and also gives the defaults.
pub fn load_config() -> Config {
    let Some(path) = config_file_path().filter(|p| p.is_file()) else {
        return Config::default();
    };
    match read_config(&path) {
        Ok(cfg) => {
            tracing::info!(path = %path.display(), "Loaded config");
            cfg
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring config file");
            Config::default()
        }
    }
}

/// Parse one TOML configuration file.
pub fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("EMBEDMAIL_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("embedmail").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    config.general.cache_dir.clone().unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("embedmail")
    })
}
