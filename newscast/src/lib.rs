//! newscast library crate.
//!
//! Runs unattended live news channels: a round-robin playlist over approved
//! queue items, rendered to cards and pushed to an RTMP ingest through one
//! supervised ffmpeg process per segment.

pub mod broadcast;
pub mod config;
pub mod control;
pub mod database;
pub mod domain;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod playlist;
pub mod render;
pub mod store;

pub use error::{Error, Result};
