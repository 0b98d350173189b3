//! `embedmail` — make email messages self-contained.
//!
//! Remote images and videos referenced by a message's HTML body are
//! downloaded, checked, optionally converted (large GIFs become MP4) and
//! attached as inline parts; the references are rewritten to `cid:` URLs.

pub mod config;
pub mod embed;
pub mod error;
pub mod export;
pub mod fetch;
pub mod media;
pub mod model;
pub mod parser;
pub mod store;
