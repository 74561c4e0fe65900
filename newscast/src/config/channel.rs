//! Per-channel runtime configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::DisplayMode;
use crate::{Error, Result};

/// Default RTMP ingest base.
pub const DEFAULT_INGEST_URL: &str = "rtmp://a.rtmp.youtube.com/live2";

/// Default on-screen time per item.
pub const DEFAULT_DISPLAY_SECONDS: u32 = 30;

/// Default length of the interstitial between items.
pub const DEFAULT_TRANSITION_SECS: u32 = 3;

/// Runtime configuration of one channel.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Ingest base URL, without the secret suffix.
    pub ingest_url: String,
    /// Ingest secret appended to the base URL.
    pub stream_key: String,
    /// How long each item stays on air.
    pub display_seconds: u32,
    pub display_mode: DisplayMode,
    /// Interstitial length between items; zero disables it.
    pub transition_secs: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            stream_key: String::new(),
            display_seconds: DEFAULT_DISPLAY_SECONDS,
            display_mode: DisplayMode::Simple,
            transition_secs: DEFAULT_TRANSITION_SECS,
        }
    }
}

impl ChannelConfig {
    /// Whether an ingest secret is configured.
    pub fn has_secret(&self) -> bool {
        !self.stream_key.trim().is_empty()
    }

    /// Full ingest endpoint (base + secret suffix).
    pub fn ingest_endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.ingest_url.trim_end_matches('/'),
            self.stream_key.trim()
        )
    }

    /// Ingest endpoint with the secret masked, for logs and status output.
    pub fn redacted_endpoint(&self) -> String {
        format!("{}/********", self.ingest_url.trim_end_matches('/'))
    }

    pub fn display_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.display_seconds))
    }

    pub fn transition_duration(&self) -> Option<Duration> {
        (self.transition_secs > 0).then(|| Duration::from_secs(u64::from(self.transition_secs)))
    }

    /// Check everything a start attempt depends on.
    pub fn validate(&self) -> Result<()> {
        if !self.has_secret() {
            return Err(Error::config("no ingest stream key configured"));
        }
        if self.ingest_url.trim().is_empty() {
            return Err(Error::config("ingest URL is empty"));
        }
        if self.display_seconds == 0 {
            return Err(Error::config("display duration must be at least one second"));
        }
        Ok(())
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("ingest_url", &self.ingest_url)
            .field("stream_key", &if self.has_secret() { "********" } else { "<unset>" })
            .field("display_seconds", &self.display_seconds)
            .field("display_mode", &self.display_mode)
            .field("transition_secs", &self.transition_secs)
            .finish()
    }
}

/// A partial configuration change.
///
/// Multiple updates can be merged, with newer values overwriting older ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfigUpdate {
    pub ingest_url: Option<String>,
    pub stream_key: Option<String>,
    pub display_seconds: Option<u32>,
    pub display_mode: Option<DisplayMode>,
    pub transition_secs: Option<u32>,
}

impl ChannelConfigUpdate {
    /// Check if there are any updates.
    pub fn has_updates(&self) -> bool {
        self.ingest_url.is_some()
            || self.stream_key.is_some()
            || self.display_seconds.is_some()
            || self.display_mode.is_some()
            || self.transition_secs.is_some()
    }

    /// Merge another update into this one (newer values overwrite).
    pub fn merge(&mut self, other: ChannelConfigUpdate) {
        if other.ingest_url.is_some() {
            self.ingest_url = other.ingest_url;
        }
        if other.stream_key.is_some() {
            self.stream_key = other.stream_key;
        }
        if other.display_seconds.is_some() {
            self.display_seconds = other.display_seconds;
        }
        if other.display_mode.is_some() {
            self.display_mode = other.display_mode;
        }
        if other.transition_secs.is_some() {
            self.transition_secs = other.transition_secs;
        }
    }

    /// Apply the update on top of `config`.
    pub fn apply_to(&self, config: &mut ChannelConfig) {
        if let Some(ref url) = self.ingest_url {
            config.ingest_url = url.clone();
        }
        if let Some(ref key) = self.stream_key {
            config.stream_key = key.clone();
        }
        if let Some(secs) = self.display_seconds {
            config.display_seconds = secs;
        }
        if let Some(mode) = self.display_mode {
            config.display_mode = mode;
        }
        if let Some(secs) = self.transition_secs {
            config.transition_secs = secs;
        }
    }
}
