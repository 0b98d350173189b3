//! Animated GIF to MP4 conversion through an external `ffmpeg`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::TranscodeOptions;
use crate::error::MediaError;
use crate::model::media::Media;
use crate::store::media::existing_size;

/// Markup replacing a converted `<img>`. `{src}` is the derived video URL.
pub const VIDEO_TEMPLATE: &str =
    r#"<video autoplay loop muted playsinline><source src="{src}" type="video/mp4"></video>"#;

const GIF_MIME: &str = "image/gif";

/// Converts large GIFs to MP4 video.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    threshold: u64,
    timeout: Duration,
}

impl Transcoder {
    /// Locate the converter. Returns `None` (after logging once) when
    /// conversion is disabled or the program cannot be found.
    pub fn detect(options: &TranscodeOptions) -> Option<Self> {
        if !options.enabled {
            debug!("GIF conversion disabled");
            return None;
        }
        match which::which(&options.ffmpeg) {
            Ok(program) => {
                debug!(program = %program.display(), "GIF conversion enabled");
                Some(Self::new(program, options.gif_threshold, options.timeout))
            }
            Err(e) => {
                warn!(
                    program = %options.ffmpeg.display(),
                    error = %e,
                    "ffmpeg not found, GIFs will be embedded as images"
                );
                None
            }
        }
    }

    pub fn new(program: impl Into<PathBuf>, threshold: u64, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            threshold,
            timeout,
        }
    }

    /// Only GIFs at or above the size threshold are converted.
    pub fn should_convert(&self, media: &Media, size: u64) -> bool {
        media.mime == GIF_MIME && size >= self.threshold
    }

    /// Convert `media` and return the record of the derived video.
    ///
    /// An existing non-empty output file is reused. The converter writes to
    /// a temporary file that is moved into place only on success.
    pub async fn convert(&self, media: &Media) -> Result<Media, MediaError> {
        let output = derived_path(&media.path);
        let video = Media {
            url: derived_url(&media.url),
            path: output.clone(),
            mime: "video/mp4".to_string(),
            extension: "mp4".to_string(),
            modified: media.modified,
        };

        if existing_size(&output).is_some() {
            debug!(path = %output.display(), "Reusing converted video");
            return Ok(video);
        }

        let part = part_path(&output);
        info!(gif = %media.path.display(), video = %output.display(), "Converting GIF");

        let child = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(&media.path)
            .args(["-movflags", "faststart"])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-vf", "scale=trunc(iw/2)*2:trunc(ih/2)*2"])
            .args(["-f", "mp4"])
            .arg(&part)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.timeout, child).await {
            Ok(result) => result,
            Err(_) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(MediaError::TranscodeTimeout {
                    path: media.path.clone(),
                    after: self.timeout,
                });
            }
        };

        let fail = |reason: String| MediaError::Transcode {
            path: media.path.clone(),
            reason,
        };

        let out = match result {
            Ok(out) => out,
            Err(e) => return Err(fail(e.to_string())),
        };
        if !out.status.success() {
            let _ = tokio::fs::remove_file(&part).await;
            let stderr = String::from_utf8_lossy(&out.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(fail(format!(
                "{}: {}",
                out.status,
                last.unwrap_or("no diagnostic output")
            )));
        }
        if existing_size(&part).is_none() {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(fail("converter produced no output".to_string()));
        }

        tokio::fs::rename(&part, &output)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(video)
    }
}

/// URL of the converted video: the GIF URL without query or fragment, plus `.mp4`.
pub fn derived_url(url: &str) -> String {
    let base = url.split(['?', '#']).next().unwrap_or(url);
    format!("{base}.mp4")
}

/// Storage path of the converted video: the GIF path plus `.mp4`.
pub fn derived_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".mp4");
    PathBuf::from(name)
}

/// Replacement markup pointing at `src`.
pub fn video_markup(src: &str) -> String {
    let escaped = src.replace('&', "&amp;").replace('"', "&quot;");
    VIDEO_TEMPLATE.replace("{src}", &escaped)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
