//! Local persistence for downloaded media.

pub mod media;
