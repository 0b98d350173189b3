//! Concurrent media downloads.

pub mod coordinator;
pub mod progress;

pub use coordinator::DownloadCoordinator;
pub use progress::{FetchEvent, ProgressLogger};
