//! Media inspection and conversion.

pub mod classify;
pub mod transcode;
