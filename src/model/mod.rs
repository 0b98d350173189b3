//! Core data model: the parsed message and the media records of one run.

pub mod media;
pub mod message;
