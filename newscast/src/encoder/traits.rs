//! Encoder trait and outcome type.

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::invocation::{EncoderInvocation, SegmentRequest};

/// Result of one encoder run. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EncoderOutcome {
    /// The process exited cleanly.
    Success,
    /// The process could not be launched or exited unsuccessfully.
    /// `exit_code` is `None` when it never started or died by signal.
    Failed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },
    /// The process was stopped on request.
    Cancelled,
}

impl EncoderOutcome {
    pub fn failed(exit_code: Option<i32>, stderr_tail: impl Into<String>) -> Self {
        Self::Failed {
            exit_code,
            stderr_tail: stderr_tail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short human-readable description, suitable for a status `last_error`.
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "success".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Failed {
                exit_code,
                stderr_tail,
            } => {
                let last_line = stderr_tail.lines().rev().find(|l| !l.trim().is_empty());
                match (exit_code, last_line) {
                    (Some(code), Some(line)) => format!("encoder exited with code {code}: {line}"),
                    (Some(code), None) => format!("encoder exited with code {code}"),
                    (None, Some(line)) => format!("encoder failed: {line}"),
                    (None, None) => "encoder failed".to_string(),
                }
            }
        }
    }
}

/// A process that pushes segments to an ingest endpoint.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Build the invocation for one segment. Pure; nothing is launched.
    fn build(&self, request: &SegmentRequest) -> EncoderInvocation;

    /// Run `invocation` until it exits or `cancel` fires.
    ///
    /// Must never return before the launched process has been reaped.
    async fn run(&self, invocation: &EncoderInvocation, cancel: &CancellationToken) -> EncoderOutcome;

    /// Whether the encoder binary could be found.
    fn is_available(&self) -> bool {
        true
    }

    /// Encoder version, if known.
    fn version(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_uses_last_stderr_line() {
        let outcome = EncoderOutcome::failed(Some(1), "line one\nConnection refused\n\n");
        assert_eq!(
            outcome.describe(),
            "encoder exited with code 1: Connection refused"
        );
        assert_eq!(EncoderOutcome::failed(None, "").describe(), "encoder failed");
        assert!(EncoderOutcome::Success.is_success());
        assert!(EncoderOutcome::Cancelled.is_cancelled());
    }
}
