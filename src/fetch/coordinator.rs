//! Bounded-concurrency downloader for the unique media URLs of one message.
//!
//! Every URL is fetched at most once. A semaphore caps the number of
//! requests in flight, each fetch carries its own deadline, and a failure
//! only affects its own URL. Results come back through the task join
//! handles and are merged into one map after all tasks have finished.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, LAST_MODIFIED};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::progress::{EventSender, FetchEvent};
use crate::config::EmbedOptions;
use crate::error::{EmbedError, MediaError, Result};
use crate::model::media::{DownloadResult, Downloaded, MediaReference};
use crate::parser::header::parse_date;
use crate::store::media::existing_size;

/// Upper bound for establishing a connection, independent of the fetch deadline.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches media URLs into the media store.
#[derive(Debug, Clone)]
pub struct DownloadCoordinator {
    client: reqwest::Client,
    concurrency: usize,
    timeout: Duration,
    reuse_existing: bool,
}

impl DownloadCoordinator {
    /// Build a coordinator with its own HTTP client.
    pub fn new(options: &EmbedOptions) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(CONNECT_TIMEOUT.min(options.fetch_timeout))
            .build()
            .map_err(|e| EmbedError::HttpClient(e.to_string()))?;

        Ok(Self::with_client(
            client,
            options.concurrency,
            options.fetch_timeout,
            options.reuse_existing,
        ))
    }

    /// Build a coordinator around an existing client.
    pub fn with_client(
        client: reqwest::Client,
        concurrency: usize,
        timeout: Duration,
        reuse_existing: bool,
    ) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
            timeout,
            reuse_existing,
        }
    }

    /// Fetch every distinct URL and wait for all of them.
    ///
    /// The returned map has exactly one entry per distinct URL that was
    /// scheduled, success or failure.
    pub async fn fetch_all(
        &self,
        references: &[MediaReference],
        events: Option<&EventSender>,
    ) -> HashMap<String, DownloadResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut scheduled = HashSet::new();

        for reference in references {
            if !scheduled.insert(reference.url.clone()) {
                continue;
            }

            let semaphore = semaphore.clone();
            let client = self.client.clone();
            let reference = reference.clone();
            let events = events.cloned();
            let timeout = self.timeout;
            let reuse = self.reuse_existing;

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return DownloadResult {
                            outcome: Err(MediaError::Request {
                                url: reference.url.clone(),
                                reason: e.to_string(),
                            }),
                            url: reference.url,
                            path: reference.path,
                        };
                    }
                };

                notify(
                    events.as_ref(),
                    FetchEvent::Started {
                        url: reference.url.clone(),
                        path: reference.path.clone(),
                    },
                );

                let outcome =
                    match tokio::time::timeout(timeout, fetch_one(&client, &reference, reuse))
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            let _ = tokio::fs::remove_file(part_path(&reference.path)).await;
                            Err(MediaError::Timeout {
                                url: reference.url.clone(),
                                after: timeout,
                            })
                        }
                    };

                notify(
                    events.as_ref(),
                    FetchEvent::Finished {
                        url: reference.url.clone(),
                        path: reference.path.clone(),
                        error: outcome.as_ref().err().map(ToString::to_string),
                        reused: outcome.as_ref().is_ok_and(|d| d.reused),
                    },
                );

                DownloadResult {
                    url: reference.url,
                    path: reference.path,
                    outcome,
                }
            });
        }

        let mut results = HashMap::with_capacity(scheduled.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.url.clone(), result);
                }
                Err(e) => error!(error = %e, "Download task panicked"),
            }
        }
        results
    }
}

fn notify(events: Option<&EventSender>, event: FetchEvent) {
    if let Some(tx) = events {
        // The logger may already be gone; progress is best-effort.
        let _ = tx.send(event);
    }
}

/// Response metadata relevant to a fetch.
#[derive(Debug, Default)]
struct ResponseMeta {
    content_length: Option<u64>,
    mime: Option<String>,
    last_modified: Option<DateTime<Utc>>,
}

impl ResponseMeta {
    /// Read the headers directly: for HEAD responses reqwest reports a
    /// zero body length regardless of `Content-Length`.
    fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            content_length: text(CONTENT_LENGTH).and_then(|v| v.trim().parse().ok()),
            mime: text(CONTENT_TYPE)
                .and_then(|v| v.split(';').next())
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| !v.is_empty()),
            last_modified: text(LAST_MODIFIED).and_then(parse_date),
        }
    }
}

/// Fetch one URL, reusing a previous download when the server confirms its size.
async fn fetch_one(
    client: &reqwest::Client,
    reference: &MediaReference,
    reuse_existing: bool,
) -> std::result::Result<Downloaded, MediaError> {
    if reuse_existing {
        if let Some(size) = existing_size(&reference.path) {
            match probe(client, &reference.url).await {
                Ok(meta) if meta.content_length == Some(size) => {
                    debug!(url = %reference.url, size, "Local copy is current, skipping download");
                    return Ok(Downloaded {
                        declared_mime: meta.mime,
                        content_length: size,
                        last_modified: meta.last_modified.or_else(|| file_mtime(&reference.path)),
                        reused: true,
                    });
                }
                Ok(meta) => {
                    debug!(
                        url = %reference.url,
                        local = size,
                        remote = ?meta.content_length,
                        "Local copy differs, downloading again"
                    );
                }
                Err(e) => {
                    debug!(url = %reference.url, error = %e, "HEAD probe failed, downloading");
                }
            }
        }
    }

    download(client, reference).await
}

/// Issue a HEAD request.
async fn probe(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<ResponseMeta, MediaError> {
    let response = client
        .head(url)
        .send()
        .await
        .map_err(|e| request_error(url, &e))?;
    if !response.status().is_success() {
        return Err(MediaError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    Ok(ResponseMeta::from_headers(response.headers()))
}

/// GET the body into `<path>.part`, verify its length, then move it into place.
async fn download(
    client: &reqwest::Client,
    reference: &MediaReference,
) -> std::result::Result<Downloaded, MediaError> {
    let url = &reference.url;
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| request_error(url, &e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::Status {
            url: url.clone(),
            status: status.as_u16(),
        });
    }

    let meta = ResponseMeta::from_headers(response.headers());
    let part = part_path(&reference.path);

    let written = match write_body(&mut response, url, &part).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };

    if let Some(expected) = meta.content_length {
        if written != expected {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(MediaError::ShortRead {
                url: url.clone(),
                expected,
                written,
            });
        }
    }

    tokio::fs::rename(&part, &reference.path)
        .await
        .map_err(|e| io_error(&reference.path, &e))?;

    Ok(Downloaded {
        declared_mime: meta.mime,
        content_length: written,
        last_modified: meta.last_modified.or_else(|| file_mtime(&reference.path)),
        reused: false,
    })
}

/// Stream the response body to a file, returning the number of bytes written.
async fn write_body(
    response: &mut reqwest::Response,
    url: &str,
    path: &Path,
) -> std::result::Result<u64, MediaError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| io_error(path, &e))?;

    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| request_error(url, &e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| io_error(path, &e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| io_error(path, &e))?;
    Ok(written)
}

/// Temporary download location next to the final file.
fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

fn request_error(url: &str, e: &reqwest::Error) -> MediaError {
    let mut reason = e.to_string();
    if let Some(source) = std::error::Error::source(e) {
        reason.push_str(": ");
        reason.push_str(&source.to_string());
    }
    MediaError::Request {
        url: url.to_string(),
        reason,
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> MediaError {
    MediaError::Io {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
