//! Input parsing: EML containers, raw headers and HTML bodies.

pub mod eml;
pub mod header;
pub mod html;
