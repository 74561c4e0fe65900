//! Process-wide settings loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::DisplayMode;
use crate::{Error, Result};

use super::channel::{ChannelConfig, DEFAULT_DISPLAY_SECONDS, DEFAULT_INGEST_URL, DEFAULT_TRANSITION_SECS};

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Root of per-channel generated assets and control files.
    pub data_dir: PathBuf,
    /// Background video and music bed live here.
    pub assets_dir: PathBuf,
    pub log_dir: PathBuf,
    pub ffmpeg_path: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Start every known channel on boot.
    pub autostart: bool,
    /// Stream frames rendered ahead of time instead of rendering cards live.
    pub prerendered_frames: bool,
    /// Defaults applied to channels without their own overrides.
    pub channel_defaults: ChannelConfig,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub idle_poll: Duration,
    pub playlist_limit: usize,
    pub kill_grace: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/newscast.db?mode=rwc".to_string(),
            data_dir: PathBuf::from("data"),
            assets_dir: PathBuf::from("assets"),
            log_dir: PathBuf::from("logs"),
            ffmpeg_path: "ffmpeg".to_string(),
            frame_width: 1920,
            frame_height: 1080,
            autostart: false,
            prerendered_frames: false,
            channel_defaults: ChannelConfig::default(),
            max_retries: 10,
            retry_delay: Duration::from_secs(5),
            idle_poll: Duration::from_secs(10),
            playlist_limit: 25,
            kill_grace: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

impl AppConfig {
    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let channel_defaults = ChannelConfig {
            ingest_url: get("NEWSCAST_RTMP_URL").unwrap_or_else(|| DEFAULT_INGEST_URL.to_string()),
            stream_key: get("NEWSCAST_STREAM_KEY").unwrap_or_default(),
            display_seconds: parse_or(&get, "NEWSCAST_DISPLAY_SECONDS", DEFAULT_DISPLAY_SECONDS)?,
            display_mode: if parse_or(&get, "NEWSCAST_BROADCAST_MODE", false)? {
                DisplayMode::Broadcast
            } else {
                DisplayMode::Simple
            },
            transition_secs: parse_or(&get, "NEWSCAST_TRANSITION_SECS", DEFAULT_TRANSITION_SECS)?,
        };

        let config = Self {
            database_url: get("NEWSCAST_DATABASE_URL").unwrap_or(defaults.database_url),
            data_dir: get("NEWSCAST_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            assets_dir: get("NEWSCAST_ASSETS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.assets_dir),
            log_dir: get("NEWSCAST_LOG_DIR").map(PathBuf::from).unwrap_or(defaults.log_dir),
            ffmpeg_path: get("NEWSCAST_FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            frame_width: parse_or(&get, "NEWSCAST_FRAME_WIDTH", defaults.frame_width)?,
            frame_height: parse_or(&get, "NEWSCAST_FRAME_HEIGHT", defaults.frame_height)?,
            autostart: parse_or(&get, "NEWSCAST_AUTOSTART", defaults.autostart)?,
            prerendered_frames: parse_or(
                &get,
                "NEWSCAST_PRERENDERED_FRAMES",
                defaults.prerendered_frames,
            )?,
            channel_defaults,
            max_retries: parse_or(&get, "NEWSCAST_MAX_RETRIES", defaults.max_retries)?,
            retry_delay: secs_or(&get, "NEWSCAST_RETRY_DELAY_SECS", defaults.retry_delay)?,
            idle_poll: secs_or(&get, "NEWSCAST_IDLE_POLL_SECS", defaults.idle_poll)?,
            playlist_limit: parse_or(&get, "NEWSCAST_PLAYLIST_LIMIT", defaults.playlist_limit)?,
            kill_grace: secs_or(&get, "NEWSCAST_KILL_GRACE_SECS", defaults.kill_grace)?,
            shutdown_timeout: secs_or(
                &get,
                "NEWSCAST_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::config("NEWSCAST_MAX_RETRIES must be at least 1"));
        }
        if self.playlist_limit == 0 {
            return Err(Error::config("NEWSCAST_PLAYLIST_LIMIT must be at least 1"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(Error::config("frame dimensions must be non-zero"));
        }
        Ok(())
    }

    /// Looping background video for broadcast mode.
    pub fn background_video(&self) -> PathBuf {
        self.assets_dir.join("video").join("background.mp4")
    }

    /// Music bed mixed under every segment when present.
    pub fn music_bed(&self) -> PathBuf {
        self.assets_dir.join("music").join("background.mp3")
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("invalid value for {key} ({raw:?}): {e}"))),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}
