//! Queue items: the unit of streamable content.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical channel identifier.
pub type ChannelId = i64;

/// Queue item identifier, stable for the lifetime of the item.
pub type ItemId = i64;

/// Maximum number of characters of a title shown in status output.
const DISPLAY_TITLE_CHARS: usize = 50;

/// Review status of a queue item.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Fetched, awaiting review.
    Pending,
    /// Approved for playback.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Retired after playback.
    Streamed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Streamed => "streamed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// One unit of streamable content.
///
/// The display fields are opaque to the broadcast core; they are only handed
/// to the asset generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub channel_id: ChannelId,
    pub title: String,
    pub summary: String,
    pub source_name: String,
    pub source_url: String,
    pub status: ItemStatus,
    /// Previously generated artifact. May be absent or stale.
    pub frame_path: Option<PathBuf>,
    pub fetched_at: DateTime<Utc>,
    /// Ordering key for FIFO playback.
    pub approved_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Create a pending item with empty display fields.
    pub fn new(id: ItemId, channel_id: ChannelId, title: impl Into<String>) -> Self {
        Self {
            id,
            channel_id,
            title: title.into(),
            summary: String::new(),
            source_name: String::new(),
            source_url: String::new(),
            status: ItemStatus::Pending,
            frame_path: None,
            fetched_at: Utc::now(),
            approved_at: None,
        }
    }

    /// Mark the item approved at `at`.
    pub fn approved(mut self, at: DateTime<Utc>) -> Self {
        self.status = ItemStatus::Approved;
        self.approved_at = Some(at);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.source_name = name.into();
        self.source_url = url.into();
        self
    }

    pub fn is_approved(&self) -> bool {
        self.status == ItemStatus::Approved
    }

    /// Title shortened for status displays.
    pub fn display_title(&self) -> String {
        truncate_chars(&self.title, DISPLAY_TITLE_CHARS)
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
