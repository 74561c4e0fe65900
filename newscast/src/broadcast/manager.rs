//! Registry of per-channel supervisors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::supervisor::{StopKind, StreamSupervisor, SupervisorDeps, SupervisorSettings};
use crate::config::{ChannelConfig, ChannelConfigUpdate};
use crate::domain::{ChannelId, StreamStatus};
use crate::{Error, Result};

/// Owns one supervisor per channel, created on first reference and kept for
/// the lifetime of the process.
pub struct ChannelManager {
    supervisors: DashMap<ChannelId, Arc<StreamSupervisor>>,
    deps: SupervisorDeps,
    settings: SupervisorSettings,
    defaults: ChannelConfig,
    shutting_down: AtomicBool,
}

impl ChannelManager {
    pub fn new(deps: SupervisorDeps, settings: SupervisorSettings, defaults: ChannelConfig) -> Self {
        Self {
            supervisors: DashMap::new(),
            deps,
            settings,
            defaults,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Get the supervisor of `channel_id`, creating it on first use.
    ///
    /// Concurrent callers for the same channel always get the same instance.
    pub fn supervisor(&self, channel_id: ChannelId) -> Arc<StreamSupervisor> {
        self.supervisors
            .entry(channel_id)
            .or_insert_with(|| {
                debug!(channel_id, "Creating stream supervisor");
                Arc::new(StreamSupervisor::new(
                    channel_id,
                    self.defaults.clone(),
                    self.deps.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    /// The supervisor of `channel_id`, if one was created.
    pub fn get(&self, channel_id: ChannelId) -> Option<Arc<StreamSupervisor>> {
        self.supervisors.get(&channel_id).map(|entry| entry.value().clone())
    }

    pub async fn start(&self, channel_id: ChannelId) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::validation("shutdown in progress, not starting streams"));
        }
        self.supervisor(channel_id).start().await
    }

    pub async fn stop(&self, channel_id: ChannelId) -> StopKind {
        self.supervisor(channel_id).stop().await
    }

    pub async fn restart(&self, channel_id: ChannelId) -> Result<()> {
        self.stop(channel_id).await;
        self.start(channel_id).await
    }

    /// Forward a configuration change. Applies from the next segment.
    pub fn update_config(&self, channel_id: ChannelId, update: ChannelConfigUpdate) {
        self.supervisor(channel_id).update_config(update);
    }

    pub fn status(&self, channel_id: ChannelId) -> StreamStatus {
        self.supervisor(channel_id).status()
    }

    /// Status of every known channel, ordered by channel id.
    pub fn statuses(&self) -> Vec<StreamStatus> {
        let mut statuses: Vec<StreamStatus> = self
            .supervisors
            .iter()
            .map(|entry| entry.value().status())
            .collect();
        statuses.sort_by_key(|status| status.channel_id);
        statuses
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self.supervisors.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop every channel, giving them `timeout` in total.
    ///
    /// All channels are stopped concurrently. A channel whose loop has not
    /// exited by the deadline is aborted, which kills its encoder.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::SeqCst);

        // Snapshot without holding shard locks across awaits.
        let supervisors: Vec<Arc<StreamSupervisor>> = self
            .supervisors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let total_channels = supervisors.len();

        info!(
            "Shutting down {} channel(s) (timeout: {:?})",
            total_channels, timeout
        );

        let results =
            futures::future::join_all(supervisors.iter().map(|s| s.stop_within(timeout))).await;

        let mut report = ShutdownReport {
            total_channels,
            ..ShutdownReport::default()
        };
        for (supervisor, kind) in supervisors.iter().zip(results) {
            match kind {
                StopKind::AlreadyStopped => report.already_stopped += 1,
                StopKind::Graceful => report.graceful_stops += 1,
                StopKind::Forced => {
                    warn!(channel_id = supervisor.channel_id(), "Channel was force-stopped");
                    report.forced_terminations += 1;
                }
            }
        }

        info!(
            "Shutdown complete: {} total, {} graceful, {} forced, {} already stopped",
            report.total_channels,
            report.graceful_stops,
            report.forced_terminations,
            report.already_stopped
        );
        report
    }
}

/// Result of a process-wide shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub total_channels: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
    pub already_stopped: usize,
}

impl ShutdownReport {
    /// Check if no channel had to be aborted.
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0
    }
}
