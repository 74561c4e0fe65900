//! Broadcast session state.

use serde::{Deserialize, Serialize};

use super::item::{ChannelId, ItemId};

/// Lifecycle state of one channel's broadcast.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// No encoder process exists.
    #[default]
    Stopped,
    /// Start requested, waiting for content, or recovering after a fault.
    Starting,
    /// The asset generator is rendering the next segment.
    Generating,
    /// The encoder is transmitting.
    Running,
    /// Stop requested, the encoder is being retired.
    Stopping,
    /// Configuration fault or retry budget exhausted.
    Error,
}

impl StreamState {
    /// Whether a supervisory loop may be alive in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Generating | Self::Running)
    }

    /// Whether this state only changes on an explicit command.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Check whether `self -> next` is a legal transition.
    ///
    /// Self-transitions are always allowed.
    pub fn can_transition_to(&self, next: StreamState) -> bool {
        use StreamState::*;

        if *self == next {
            return true;
        }

        match (self, next) {
            (Stopped | Error, Starting) => true,
            (Error, Stopped) => true,
            (Starting, Generating | Error | Stopping) => true,
            (Generating, Running | Starting | Error | Stopping) => true,
            (Running, Generating | Starting | Error | Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }
}

/// How segments are composed on screen.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// One rendered asset per segment.
    #[default]
    Simple,
    /// Looped background video, composited overlay and scrolling ticker.
    Broadcast,
}

/// Point-in-time view of a channel's broadcast, as seen by administration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub channel_id: ChannelId,
    pub state: StreamState,
    pub is_running: bool,
    pub current_item_id: Option<ItemId>,
    pub current_item_title: Option<String>,
    pub consecutive_failures: u32,
    pub segments_streamed: u64,
    pub last_error: Option<String>,
    pub display_mode: DisplayMode,
}
