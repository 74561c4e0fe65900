//! Database row models.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::config::ChannelConfigUpdate;
use crate::domain::{ItemStatus, QueueItem};

/// Queue item row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QueueItemDbModel {
    pub id: i64,
    pub channel_id: i64,
    pub title: String,
    pub summary: String,
    pub source_name: String,
    pub source_url: String,
    /// pending, approved, rejected or streamed
    pub status: String,
    pub frame_path: Option<String>,
    /// Unix epoch milliseconds (UTC).
    pub fetched_at: i64,
    /// Unix epoch milliseconds (UTC).
    pub approved_at: Option<i64>,
}

impl QueueItemDbModel {
    pub fn into_domain(self) -> QueueItem {
        let status = ItemStatus::parse(&self.status).unwrap_or_else(|| {
            tracing::warn!(
                item_id = self.id,
                status = %self.status,
                "Unknown item status, treating as pending"
            );
            ItemStatus::Pending
        });

        QueueItem {
            id: self.id,
            channel_id: self.channel_id,
            title: self.title,
            summary: self.summary,
            source_name: self.source_name,
            source_url: self.source_url,
            status,
            frame_path: self.frame_path.map(PathBuf::from),
            fetched_at: from_ms(self.fetched_at).unwrap_or_else(Utc::now),
            approved_at: self.approved_at.and_then(from_ms),
        }
    }
}

/// Channel row. Unset columns fall back to process-wide defaults.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelDbModel {
    pub id: i64,
    pub name: String,
    pub stream_key: Option<String>,
    pub rtmp_url: Option<String>,
    pub display_seconds: Option<i64>,
    /// Unix epoch milliseconds (UTC).
    pub created_at: i64,
}

impl ChannelDbModel {
    /// Per-channel overrides of the global channel defaults.
    pub fn overrides(&self) -> ChannelConfigUpdate {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        ChannelConfigUpdate {
            ingest_url: non_empty(&self.rtmp_url),
            stream_key: non_empty(&self.stream_key),
            display_seconds: self
                .display_seconds
                .and_then(|secs| u32::try_from(secs).ok())
                .filter(|secs| *secs > 0),
            ..ChannelConfigUpdate::default()
        }
    }
}

fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
