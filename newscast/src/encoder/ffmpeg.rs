//! FFmpeg-backed encoder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::invocation::{EncoderInvocation, EncoderProfile, SegmentRequest};
use super::process::{ProcessSettings, run_to_completion};
use super::traits::{Encoder, EncoderOutcome};

fn default_ffmpeg_path() -> String {
    std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string())
}

/// FFmpeg encoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FfmpegEncoderConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub binary_path: String,
    #[serde(default)]
    pub profile: EncoderProfile,
    #[serde(skip)]
    pub process: ProcessSettings,
}

impl Default for FfmpegEncoderConfig {
    fn default() -> Self {
        Self {
            binary_path: default_ffmpeg_path(),
            profile: EncoderProfile::default(),
            process: ProcessSettings::default(),
        }
    }
}

/// Streams segments by launching one ffmpeg process per segment.
pub struct FfmpegEncoder {
    config: FfmpegEncoderConfig,
    /// Cached version string.
    version: Option<String>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_config(FfmpegEncoderConfig::default())
    }

    pub fn with_config(config: FfmpegEncoderConfig) -> Self {
        let version = Self::detect_version(&config.binary_path);
        match &version {
            Some(v) => info!("Using {}", v),
            None => debug!("Could not detect ffmpeg version at {}", config.binary_path),
        }
        Self { config, version }
    }

    pub fn config(&self) -> &FfmpegEncoderConfig {
        &self.config
    }

    /// Detect ffmpeg version.
    fn detect_version(path: &str) -> Option<String> {
        process_utils::std_command(path)
            .arg("-version")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .and_then(|s| s.lines().next().map(|l| l.to_string()))
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn build(&self, request: &SegmentRequest) -> EncoderInvocation {
        EncoderInvocation::build(&self.config.binary_path, &self.config.profile, request)
    }

    async fn run(&self, invocation: &EncoderInvocation, cancel: &CancellationToken) -> EncoderOutcome {
        run_to_completion(invocation, cancel, &self.config.process).await
    }

    fn is_available(&self) -> bool {
        self.version.is_some()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}
