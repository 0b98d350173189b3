//! Download progress notifications.
//!
//! The coordinator emits [`FetchEvent`]s on a channel; [`ProgressLogger`]
//! consumes them, writes log lines and drives an optional progress bar.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Start/stop notification for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Started {
        url: String,
        path: PathBuf,
    },
    Finished {
        url: String,
        path: PathBuf,
        /// `None` on success.
        error: Option<String>,
        /// The body was not downloaded; an existing local file was kept.
        reused: bool,
    },
}

pub type EventSender = mpsc::UnboundedSender<FetchEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<FetchEvent>;

/// Counters collected while draining the event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTally {
    pub fetched: usize,
    pub reused: usize,
    pub failed: usize,
}

/// Consumes fetch events until every sender is dropped.
pub struct ProgressLogger {
    bar: ProgressBar,
}

impl ProgressLogger {
    /// Create a logger for `total` fetches. The bar is hidden unless `show_bar` is set.
    pub fn new(total: u64, show_bar: bool) -> Self {
        let bar = if show_bar {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} Fetching [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
                    .expect("valid template")
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };
        Self { bar }
    }

    /// Drain the channel, returning what was seen.
    pub async fn run(self, mut events: EventReceiver) -> ProgressTally {
        let mut tally = ProgressTally::default();
        while let Some(event) = events.recv().await {
            self.handle(&event, &mut tally);
        }
        self.bar.finish_and_clear();
        tally
    }

    fn handle(&self, event: &FetchEvent, tally: &mut ProgressTally) {
        match event {
            FetchEvent::Started { url, path } => {
                debug!(url = %url, path = %path.display(), "Download started");
                self.bar.set_message(url.clone());
            }
            FetchEvent::Finished {
                url,
                path,
                error: Some(error),
                ..
            } => {
                tally.failed += 1;
                warn!(url = %url, path = %path.display(), error = %error, "Download failed");
                self.bar.inc(1);
            }
            FetchEvent::Finished {
                url,
                path,
                error: None,
                reused,
            } => {
                if *reused {
                    tally.reused += 1;
                    info!(url = %url, path = %path.display(), "Reused existing file");
                } else {
                    tally.fetched += 1;
                    info!(url = %url, path = %path.display(), "Download done");
                }
                self.bar.inc(1);
            }
        }
    }
}
