//! Output side: inline attachments and message serialization.

pub mod attachment;
pub mod eml;
