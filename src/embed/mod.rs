//! The media-inlining pipeline.
//!
//! For each message: resolve relative references, extract remote URLs,
//! fetch them all (bounded, deduplicated), classify the downloads, convert
//! large GIFs, then rewrite every reference in document order and
//! serialize. Rewriting starts only after every fetch and conversion has
//! settled, so the URL to media mapping is complete by then.

pub mod extract;
pub mod rewrite;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EmbedOptions;
use crate::error::{EmbedError, MediaError, Result};
use crate::export::attachment::AttachmentBuilder;
use crate::export::eml::write_message;
use crate::fetch::{DownloadCoordinator, ProgressLogger};
use crate::media::classify::classify_file;
use crate::media::transcode::{video_markup, Transcoder};
use crate::model::media::{DownloadResult, Media, MediaCache, MediaReference};
use crate::parser::eml::parse_message;
use crate::parser::html::{Document, HtmlDocument};
use crate::store::media::{existing_size, MediaStore};

use self::rewrite::{rewrite_references, RewriteContext};

/// Per-message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    /// The message had an HTML body.
    pub html: bool,
    /// Relative references resolved against `Content-Base`.
    pub resolved: usize,
    /// Distinct remote URLs.
    pub urls: usize,
    pub fetched: usize,
    pub reused: usize,
    pub failed: usize,
    /// Downloads rejected by classification.
    pub unsupported: usize,
    /// GIFs replaced by video.
    pub transcoded: usize,
    /// Inline parts added to the message.
    pub attached: usize,
    /// Element references now pointing at a `cid:`.
    pub rewritten: usize,
    /// Remote element references left unchanged.
    pub missing: usize,
    /// References already inline (`data:`, `cid:`) or empty.
    pub inline: usize,
    /// References that cannot be fetched: other schemes, or relative without a base.
    pub unreachable: usize,
}

/// Result of embedding one message in memory.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub bytes: Vec<u8>,
    pub stats: MessageStats,
}

/// A processed input file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub stats: MessageStats,
}

/// Why an input was not processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// The input itself is an output of a previous run.
    AlreadyEmbedded,
    /// The output file already exists.
    OutputExists,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub input: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub input: PathBuf,
    pub error: String,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub processed: Vec<FileReport>,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<FailedFile>,
}

impl RunSummary {
    /// Sum of the per-file counters.
    pub fn totals(&self) -> MessageStats {
        self.processed
            .iter()
            .fold(MessageStats::default(), |mut acc, report| {
                let s = &report.stats;
                acc.html |= s.html;
                acc.resolved += s.resolved;
                acc.urls += s.urls;
                acc.fetched += s.fetched;
                acc.reused += s.reused;
                acc.failed += s.failed;
                acc.unsupported += s.unsupported;
                acc.transcoded += s.transcoded;
                acc.attached += s.attached;
                acc.rewritten += s.rewritten;
                acc.missing += s.missing;
                acc.inline += s.inline;
                acc.unreachable += s.unreachable;
                acc
            })
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Runs the pipeline over messages and files.
pub struct Embedder {
    options: EmbedOptions,
    store: MediaStore,
    coordinator: DownloadCoordinator,
    transcoder: Option<Transcoder>,
}

impl Embedder {
    /// Open the media store, build the HTTP client and probe for the converter.
    pub fn new(options: EmbedOptions) -> Result<Self> {
        let store = MediaStore::open(&options.media_dir)?;
        let coordinator = DownloadCoordinator::new(&options)?;
        let transcoder = Transcoder::detect(&options.transcode);
        Ok(Self {
            options,
            store,
            coordinator,
            transcoder,
        })
    }

    /// Process a batch of files. An empty list means every `*.eml` in the
    /// current directory.
    pub async fn run(&self, inputs: &[PathBuf]) -> Result<RunSummary> {
        let inputs = if inputs.is_empty() {
            default_inputs(Path::new("."))?
        } else {
            inputs.to_vec()
        };
        if inputs.is_empty() {
            return Err(EmbedError::NoInput);
        }

        let mut summary = RunSummary::default();
        for input in inputs {
            if let Some(reason) = self.skip_reason(&input) {
                info!(file = %input.display(), reason = ?reason, "Skipped");
                summary.skipped.push(SkippedFile { input, reason });
                continue;
            }

            info!(file = %input.display(), "Processing");
            match self.embed_file(&input).await {
                Ok(report) => summary.processed.push(report),
                Err(e) if self.options.keep_going => {
                    error!(file = %input.display(), error = %e, "Failed, continuing");
                    summary.failed.push(FailedFile {
                        input,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Whether `input` must not be processed.
    pub fn skip_reason(&self, input: &Path) -> Option<SkipReason> {
        let name = input.file_name()?.to_string_lossy();
        if name.ends_with(&self.options.suffix) {
            return Some(SkipReason::AlreadyEmbedded);
        }
        if self.output_path(input).exists() {
            return Some(SkipReason::OutputExists);
        }
        None
    }

    /// Sibling output path: `name.eml` becomes `name<suffix>`.
    pub fn output_path(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.strip_suffix(".eml").unwrap_or(&name);
        input.with_file_name(format!("{stem}{}", self.options.suffix))
    }

    /// Embed one file and write its output next to it.
    pub async fn embed_file(&self, input: &Path) -> Result<FileReport> {
        let raw = std::fs::read(input).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EmbedError::FileNotFound(input.to_path_buf())
            } else {
                EmbedError::io(input, e)
            }
        })?;

        let embedded = self.embed_bytes(&raw, input).await?;

        let output = self.output_path(input);
        let part = output.with_file_name(format!(
            "{}.part",
            output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        ));
        std::fs::write(&part, &embedded.bytes).map_err(|e| EmbedError::io(&part, e))?;
        std::fs::rename(&part, &output).map_err(|e| EmbedError::io(&output, e))?;

        info!(
            file = %input.display(),
            output = %output.display(),
            rewritten = embedded.stats.rewritten,
            missing = embedded.stats.missing,
            "Done"
        );
        Ok(FileReport {
            input: input.to_path_buf(),
            output,
            stats: embedded.stats,
        })
    }

    /// Embed the media of one raw message. `origin` is used for error context.
    ///
    /// A message without an HTML body is returned unchanged.
    pub async fn embed_bytes(&self, raw: &[u8], origin: &Path) -> Result<Embedded> {
        let mut message =
            parse_message(raw).ok_or_else(|| EmbedError::InvalidMessage(origin.to_path_buf()))?;

        let Some(html) = message.html.take() else {
            info!(file = %origin.display(), "No HTML body, copying unchanged");
            return Ok(Embedded {
                bytes: raw.to_vec(),
                stats: MessageStats::default(),
            });
        };

        let mut stats = MessageStats {
            html: true,
            ..MessageStats::default()
        };
        let doc = Document::parse(&html);

        if let Some(base) = message.header("content-base") {
            stats.resolved = extract::resolve_relative(&doc, &base);
        }

        let references = extract::extract_references(&doc, &self.store);
        stats.urls = references.len();

        let downloads = self.fetch(&references, &mut stats).await;
        let (mut cache, failures) = collect_media(&references, &downloads, &mut stats);

        if let Some(transcoder) = &self.transcoder {
            stats.transcoded = convert_gifs(&doc, transcoder, &mut cache).await;
        }

        let mut attachments = AttachmentBuilder::new();
        let ctx = RewriteContext {
            media: &cache,
            failures: &failures,
            on_missing: self.options.on_missing,
        };
        let counts = rewrite_references(&doc, &mut message, &mut attachments, &ctx);
        stats.rewritten = counts.rewritten;
        stats.missing = counts.missing;
        stats.inline = counts.skipped;
        stats.unreachable = counts.unsupported;
        stats.attached = attachments.len();

        message.html = Some(doc.serialize()?);
        let bytes = write_message(&message)?;
        Ok(Embedded { bytes, stats })
    }

    /// Download every reference, reporting progress through the event channel.
    async fn fetch(
        &self,
        references: &[MediaReference],
        stats: &mut MessageStats,
    ) -> HashMap<String, DownloadResult> {
        if references.is_empty() {
            return HashMap::new();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let logger = tokio::spawn(
            ProgressLogger::new(references.len() as u64, self.options.progress_bar).run(rx),
        );
        let downloads = self.coordinator.fetch_all(references, Some(&tx)).await;
        drop(tx);

        match logger.await {
            Ok(tally) => {
                stats.fetched = tally.fetched;
                stats.reused = tally.reused;
                stats.failed = tally.failed;
            }
            Err(e) => warn!(error = %e, "Progress logger stopped"),
        }
        downloads
    }
}

/// Classify the downloads, keeping only images and videos.
fn collect_media(
    references: &[MediaReference],
    downloads: &HashMap<String, DownloadResult>,
    stats: &mut MessageStats,
) -> (MediaCache, HashMap<String, MediaError>) {
    let mut cache = MediaCache::new();
    let mut failures = HashMap::new();

    for reference in references {
        let url = &reference.url;
        let Some(result) = downloads.get(url) else {
            failures.insert(url.clone(), MediaError::Missing(url.clone()));
            continue;
        };
        let downloaded = match &result.outcome {
            Ok(downloaded) => downloaded,
            Err(e) => {
                failures.insert(url.clone(), e.clone());
                continue;
            }
        };

        match classify_file(&result.path) {
            Ok(found) if found.is_embeddable() => {
                if let Some(declared) = &downloaded.declared_mime {
                    if declared != found.mime {
                        debug!(url = %url, declared = %declared, detected = found.mime, "Declared type differs");
                    }
                }
                let media = Media {
                    url: url.clone(),
                    path: result.path.clone(),
                    mime: found.mime.to_string(),
                    extension: found.extension.to_string(),
                    modified: downloaded.last_modified,
                };
                if cache.insert(media).is_err() {
                    debug!(url = %url, "Media already registered");
                }
            }
            Ok(found) => {
                let e = MediaError::Unsupported {
                    url: url.clone(),
                    mime: found.mime.to_string(),
                };
                warn!(url = %url, error = %e, "Not embedding");
                stats.unsupported += 1;
                failures.insert(url.clone(), e);
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Not embedding");
                stats.unsupported += 1;
                failures.insert(url.clone(), e);
            }
        }
    }
    (cache, failures)
}

/// Convert large GIFs referenced by `<img>` elements and swap those elements
/// for `<video>` markup. Returns the number of GIFs converted.
async fn convert_gifs<D: HtmlDocument>(
    doc: &D,
    transcoder: &Transcoder,
    cache: &mut MediaCache,
) -> usize {
    let mut candidates = Vec::new();
    let mut seen = HashSet::new();
    for element in doc.select_tags(&["img"]) {
        let Some(src) = doc.attr(&element, "src") else {
            continue;
        };
        let Some(media) = cache.get(&src) else {
            continue;
        };
        let size = existing_size(&media.path).unwrap_or(0);
        if transcoder.should_convert(media, size) && seen.insert(src.clone()) {
            candidates.push(media.clone());
        }
    }

    let mut converted: HashMap<String, String> = HashMap::new();
    for gif in candidates {
        match transcoder.convert(&gif).await {
            Ok(video) => {
                let video_url = video.url.clone();
                if let Err(video) = cache.insert(video) {
                    // Another GIF already claimed this URL (same path, other query).
                    if cache.get(&video_url).map(|m| &m.path) != Some(&video.path) {
                        warn!(url = %gif.url, video = %video_url, "Video URL taken, keeping original GIF");
                        continue;
                    }
                }
                converted.insert(gif.url, video_url);
            }
            Err(e) => warn!(url = %gif.url, error = %e, "Keeping original GIF"),
        }
    }

    if converted.is_empty() {
        return 0;
    }
    for element in doc.select_tags(&["img"]) {
        if let Some(video_url) = doc
            .attr(&element, "src")
            .and_then(|src| converted.get(&src))
        {
            doc.replace_with_html(&element, &video_markup(video_url));
        }
    }
    converted.len()
}

/// `*.eml` files of a directory, sorted by name.
pub fn default_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| EmbedError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".eml"))
        })
        .collect();
    files.sort();
    Ok(files)
}
