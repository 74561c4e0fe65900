//! Configuration module.
//!
//! Process-wide settings are read from the environment (with `.env`
//! support); per-channel runtime configuration can be replaced while a
//! channel is live and takes effect with its next segment.

pub mod channel;
pub mod settings;

pub use channel::{ChannelConfig, ChannelConfigUpdate, DEFAULT_INGEST_URL};
pub use settings::AppConfig;
