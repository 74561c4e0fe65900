//! Per-channel stream supervisor.
//!
//! A `StreamSupervisor` owns one channel's session and drives the
//! supervisory loop:
//!
//! 1. ask the playlist for the next item (waiting while the queue is empty)
//! 2. `Generating`: render the item
//! 3. `Running`: stream it through the encoder until it exits
//! 4. on success reset the failure streak, otherwise back off and retry
//!    until the failure threshold is reached, then settle in `Error`
//!
//! Every wait in the loop races the session's cancellation token, so a stop
//! request is honoured within the encoder's kill grace period.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::{FailureTracker, FailureVerdict, RetryPolicy};
use crate::config::{AppConfig, ChannelConfig, ChannelConfigUpdate};
use crate::domain::{ChannelId, DisplayMode, ItemId, QueueItem, StreamState, StreamStatus};
use crate::encoder::{Encoder, EncoderOutcome, PlaybackMode, SegmentDuration, SegmentRequest};
use crate::playlist::{PlaylistScheduler, ScheduledItem, Selection, ticker_text};
use crate::render::{AssetGenerator, AssetKind, RenderRequest, RenderedAsset};
use crate::store::ItemStore;
use crate::{Error, Result};

/// Capacity of the state change event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default time a stop waits for the loop before aborting it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Collaborators shared by every channel.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub store: Arc<dyn ItemStore>,
    pub generator: Arc<dyn AssetGenerator>,
    pub encoder: Arc<dyn Encoder>,
}

/// Loop tuning shared by every channel.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub retry: RetryPolicy,
    /// Maximum snapshot size read from the queue.
    pub playlist_limit: usize,
    /// How long a stop waits for the loop before aborting it.
    pub stop_timeout: Duration,
    /// Looped background for broadcast mode, used when the file exists.
    pub background_video: Option<PathBuf>,
    /// Looped music bed, used when the file exists.
    pub music_bed: Option<PathBuf>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            playlist_limit: 25,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            background_video: None,
            music_bed: None,
        }
    }
}

impl SupervisorSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            retry: RetryPolicy::from_app_config(config),
            playlist_limit: config.playlist_limit,
            // Leave room for the encoder's terminate-then-kill sequence.
            stop_timeout: config.kill_grace + Duration::from_secs(5),
            background_video: Some(config.background_video()),
            music_bed: Some(config.music_bed()),
        }
    }
}

/// How a stop request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    /// Nothing was running.
    AlreadyStopped,
    /// The loop exited on its own after cancellation.
    Graceful,
    /// The loop did not exit in time and was aborted.
    Forced,
}

/// One observed state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub channel_id: ChannelId,
    pub from: StreamState,
    pub to: StreamState,
}

/// Live state of one channel's broadcast.
#[derive(Debug)]
struct Session {
    state: StreamState,
    config: ChannelConfig,
    /// Changes received while active, applied at the next segment.
    pending: ChannelConfigUpdate,
    current_item: Option<(ItemId, String)>,
    failures: FailureTracker,
    segments_streamed: u64,
}

/// State shared between the handle and its loop task.
struct Shared {
    channel_id: ChannelId,
    deps: SupervisorDeps,
    settings: SupervisorSettings,
    session: RwLock<Session>,
    state_tx: watch::Sender<StreamState>,
    events: broadcast::Sender<StateChange>,
}

/// Control flow of the loop after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Halt,
}

struct LoopTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervisor of one channel.
pub struct StreamSupervisor {
    shared: Arc<Shared>,
    task: Mutex<Option<LoopTask>>,
}

impl StreamSupervisor {
    pub fn new(
        channel_id: ChannelId,
        config: ChannelConfig,
        deps: SupervisorDeps,
        settings: SupervisorSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(StreamState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                channel_id,
                deps,
                settings,
                session: RwLock::new(Session {
                    state: StreamState::Stopped,
                    config,
                    pending: ChannelConfigUpdate::default(),
                    current_item: None,
                    failures: FailureTracker::new(),
                    segments_streamed: 0,
                }),
                state_tx,
                events,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.shared.channel_id
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Start streaming.
    ///
    /// A no-op while the loop is already active. A configuration fault moves
    /// the channel to `Error` and is returned without entering the loop.
    pub async fn start(&self) -> Result<()> {
        let channel_id = self.shared.channel_id;
        let mut task = self.task.lock().await;

        if let Some(running) = task.as_ref()
            && !running.handle.is_finished()
        {
            debug!(channel_id, "Start ignored, stream is {}", self.state());
            return Ok(());
        }
        if let Some(finished) = task.take() {
            let _ = finished.handle.await;
        }

        let config = self.shared.apply_pending_config();
        {
            let mut session = self.shared.session.write();
            session.failures.reset();
            session.current_item = None;
        }
        self.shared.transition(StreamState::Starting)?;

        if let Err(e) = config.validate() {
            error!(channel_id, "Cannot start stream: {}", e);
            self.shared.session.write().failures.note_error(e.to_string());
            let _ = self.shared.transition(StreamState::Error);
            return Err(e);
        }

        info!(
            channel_id,
            endpoint = %config.redacted_endpoint(),
            mode = %config.display_mode,
            "Starting stream"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.shared.clone(), cancel.clone()));
        *task = Some(LoopTask { cancel, handle });
        Ok(())
    }

    /// Stop streaming, waiting up to the configured stop timeout.
    pub async fn stop(&self) -> StopKind {
        self.stop_within(self.shared.settings.stop_timeout).await
    }

    /// Stop streaming, aborting the loop if it has not exited after `timeout`.
    ///
    /// Always settles in `Stopped`, never `Error`.
    pub async fn stop_within(&self, timeout: Duration) -> StopKind {
        let channel_id = self.shared.channel_id;
        let mut task = self.task.lock().await;

        let Some(mut running) = task.take() else {
            self.shared.settle_stopped().await;
            return StopKind::AlreadyStopped;
        };

        if running.handle.is_finished() {
            // The loop gave up on its own; only the settled state remains.
            let _ = (&mut running.handle).await;
            self.shared.settle_stopped().await;
            return StopKind::AlreadyStopped;
        }

        info!(channel_id, "Stopping stream");
        let _ = self.shared.transition(StreamState::Stopping);
        running.cancel.cancel();

        let kind = match tokio::time::timeout(timeout, &mut running.handle).await {
            Ok(_) => StopKind::Graceful,
            Err(_) => {
                warn!(
                    channel_id,
                    "Stream loop did not exit within {:?}, aborting", timeout
                );
                running.handle.abort();
                let _ = running.handle.await;
                StopKind::Forced
            }
        };

        self.shared.settle_stopped().await;
        info!(channel_id, "Stream stopped ({})", kind);
        kind
    }

    /// Change the channel configuration.
    ///
    /// While active the change takes effect with the next segment; the one
    /// on air keeps its settings.
    pub fn update_config(&self, update: ChannelConfigUpdate) {
        if !update.has_updates() {
            return;
        }
        let mut session = self.shared.session.write();
        if session.state.is_settled() {
            // Changes queued while the stream was active are older than this one.
            let queued = std::mem::take(&mut session.pending);
            queued.apply_to(&mut session.config);
            update.apply_to(&mut session.config);
            debug!(channel_id = self.shared.channel_id, "Configuration updated");
        } else {
            session.pending.merge(update);
            debug!(
                channel_id = self.shared.channel_id,
                "Configuration update queued for next segment"
            );
        }
    }

    /// Configuration including changes not yet applied.
    pub fn config(&self) -> ChannelConfig {
        let session = self.shared.session.read();
        let mut config = session.config.clone();
        session.pending.apply_to(&mut config);
        config
    }

    pub fn status(&self) -> StreamStatus {
        let session = self.shared.session.read();
        StreamStatus {
            channel_id: self.shared.channel_id,
            state: session.state,
            is_running: session.state.is_active(),
            current_item_id: session.current_item.as_ref().map(|(id, _)| *id),
            current_item_title: session.current_item.as_ref().map(|(_, title)| title.clone()),
            consecutive_failures: session.failures.consecutive(),
            segments_streamed: session.segments_streamed,
            last_error: session.failures.last_error().map(str::to_string),
            display_mode: session.config.display_mode,
        }
    }

    /// Latest state, updated on every transition.
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.shared.state_tx.subscribe()
    }

    /// Every transition, in order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StateChange> {
        self.shared.events.subscribe()
    }

    /// Wait until the state equals `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: StreamState, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        )
    }
}

impl Shared {
    fn state(&self) -> StreamState {
        self.session.read().state
    }

    /// Move to `to`, rejecting transitions the state machine forbids.
    fn transition(&self, to: StreamState) -> Result<()> {
        let from = {
            let mut session = self.session.write();
            let from = session.state;
            if !from.can_transition_to(to) {
                drop(session);
                debug!(channel_id = self.channel_id, "Rejected transition {} -> {}", from, to);
                return Err(Error::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            session.state = to;
            from
        };

        if from != to {
            debug!(channel_id = self.channel_id, "State {} -> {}", from, to);
            self.state_tx.send_replace(to);
            let _ = self.events.send(StateChange {
                channel_id: self.channel_id,
                from,
                to,
            });
        }
        Ok(())
    }

    fn set_current(&self, item: Option<&QueueItem>) {
        self.session.write().current_item = item.map(|item| (item.id, item.display_title()));
    }

    /// Fold queued changes into the live configuration and return it.
    fn apply_pending_config(&self) -> ChannelConfig {
        let mut session = self.session.write();
        if session.pending.has_updates() {
            let pending = std::mem::take(&mut session.pending);
            pending.apply_to(&mut session.config);
            info!(channel_id = self.channel_id, "Applied configuration update");
        }
        session.config.clone()
    }

    async fn settle_stopped(&self) {
        self.set_current(None);
        if self.state() != StreamState::Stopped {
            let _ = self.transition(StreamState::Stopped);
        }
        if let Err(e) = self.deps.generator.clear(self.channel_id).await {
            warn!(channel_id = self.channel_id, "Failed to clear channel assets: {}", e);
        }
    }

    /// Count a failed attempt, then back off or give up.
    async fn on_failure(&self, cancel: &CancellationToken, error: String) -> Step {
        let verdict = self
            .session
            .write()
            .failures
            .record_failure(&self.settings.retry, error.clone());

        match verdict {
            FailureVerdict::Exhausted { attempts } => {
                error!(
                    channel_id = self.channel_id,
                    attempts, "Giving up after consecutive failures: {}", error
                );
                let _ = self.transition(StreamState::Error);
                Step::Halt
            }
            FailureVerdict::Retry { attempt, delay } => {
                warn!(
                    channel_id = self.channel_id,
                    attempt,
                    max = self.settings.retry.max_consecutive_failures,
                    "{}; retrying in {:?}",
                    error,
                    delay
                );
                if self.transition(StreamState::Starting).is_err() {
                    return Step::Halt;
                }
                if sleep_or_cancel(cancel, delay).await {
                    Step::Continue
                } else {
                    Step::Halt
                }
            }
        }
    }

    /// Render and stream one scheduled item.
    async fn play(&self, scheduled: &ScheduledItem, config: &ChannelConfig, cancel: &CancellationToken) -> Step {
        let item = &scheduled.item;
        self.set_current(Some(item));
        if self.transition(StreamState::Generating).is_err() {
            return Step::Halt;
        }

        let request = RenderRequest {
            channel_id: self.channel_id,
            item,
            neighbors: &scheduled.neighbors,
            display_mode: config.display_mode,
        };
        let rendered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Halt,
            rendered = self.deps.generator.render(request) => rendered,
        };
        let asset = match rendered {
            Ok(asset) => asset,
            Err(e) => {
                return self
                    .on_failure(cancel, format!("render failed for item {}: {}", item.id, e))
                    .await;
            }
        };

        if self.transition(StreamState::Running).is_err() {
            return Step::Halt;
        }

        let segment = self.segment_request(&asset, config, &scheduled.neighbors).await;
        let invocation = self.deps.encoder.build(&segment);
        info!(
            channel_id = self.channel_id,
            item_id = item.id,
            position = scheduled.position + 1,
            of = scheduled.cycle_len,
            mode = segment.mode.name(),
            "Streaming '{}'",
            item.display_title()
        );

        match self.deps.encoder.run(&invocation, cancel).await {
            EncoderOutcome::Success => {
                {
                    let mut session = self.session.write();
                    session.failures.record_success();
                    session.segments_streamed += 1;
                }
                self.play_transition(config, cancel).await
            }
            EncoderOutcome::Cancelled => Step::Halt,
            failed @ EncoderOutcome::Failed { .. } => {
                if cancel.is_cancelled() {
                    return Step::Halt;
                }
                if let EncoderOutcome::Failed {
                    exit_code,
                    stderr_tail,
                } = &failed
                {
                    debug!(
                        channel_id = self.channel_id,
                        item_id = item.id,
                        exit_code = ?exit_code,
                        "Encoder stderr tail:\n{}",
                        stderr_tail
                    );
                }
                self.on_failure(cancel, failed.describe()).await
            }
        }
    }

    /// Stream the interstitial between items. Failures here are not counted.
    async fn play_transition(&self, config: &ChannelConfig, cancel: &CancellationToken) -> Step {
        let Some(duration) = config.transition_duration() else {
            return Step::Continue;
        };

        let rendered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Step::Halt,
            rendered = self.deps.generator.render_transition(self.channel_id) => rendered,
        };
        let asset = match rendered {
            Ok(Some(asset)) => asset,
            Ok(None) => return Step::Continue,
            Err(e) => {
                debug!(channel_id = self.channel_id, "Transition unavailable: {}", e);
                return Step::Continue;
            }
        };

        self.set_current(None);
        let mode = match asset.kind {
            AssetKind::Image => PlaybackMode::SingleImage { image: asset.path },
            AssetKind::Clip => PlaybackMode::Clip { video: asset.path },
        };
        let segment = SegmentRequest {
            mode,
            audio_bed: existing(self.settings.music_bed.as_deref()).await,
            duration: SegmentDuration::Bounded(duration),
            destination: config.ingest_endpoint(),
            redacted_destination: config.redacted_endpoint(),
        };

        match self.deps.encoder.run(&self.deps.encoder.build(&segment), cancel).await {
            EncoderOutcome::Cancelled => Step::Halt,
            EncoderOutcome::Success => Step::Continue,
            failed => {
                if cancel.is_cancelled() {
                    return Step::Halt;
                }
                debug!(channel_id = self.channel_id, "Transition failed: {}", failed.describe());
                Step::Continue
            }
        }
    }

    async fn segment_request(
        &self,
        asset: &RenderedAsset,
        config: &ChannelConfig,
        neighbors: &[QueueItem],
    ) -> SegmentRequest {
        let mode = match (config.display_mode, asset.kind) {
            (_, AssetKind::Clip) => PlaybackMode::Clip {
                video: asset.path.clone(),
            },
            (DisplayMode::Simple, AssetKind::Image) => PlaybackMode::SingleImage {
                image: asset.path.clone(),
            },
            (DisplayMode::Broadcast, AssetKind::Image) => PlaybackMode::LoopedBackgroundWithOverlay {
                background: existing(self.settings.background_video.as_deref()).await,
                overlay: asset.path.clone(),
                ticker: ticker_text(neighbors),
            },
        };
        let duration = match mode {
            // A clip runs for its own length.
            PlaybackMode::Clip { .. } => SegmentDuration::Unbounded,
            _ => SegmentDuration::Bounded(config.display_duration()),
        };

        SegmentRequest {
            mode,
            audio_bed: existing(self.settings.music_bed.as_deref()).await,
            duration,
            destination: config.ingest_endpoint(),
            redacted_destination: config.redacted_endpoint(),
        }
    }
}

/// The supervisory loop. Runs until cancelled or the failure threshold is hit.
async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    let channel_id = shared.channel_id;
    let mut scheduler = PlaylistScheduler::new(
        channel_id,
        shared.deps.store.clone(),
        shared.settings.playlist_limit,
    );
    debug!(channel_id, "Stream loop started");

    while !cancel.is_cancelled() {
        let config = shared.apply_pending_config();
        if let Err(e) = config.validate() {
            error!(channel_id, "Configuration no longer valid: {}", e);
            shared.session.write().failures.note_error(e.to_string());
            let _ = shared.transition(StreamState::Error);
            break;
        }

        let selection = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            selection = scheduler.next() => selection,
        };

        let step = match selection {
            Ok(Selection::Item(scheduled)) => shared.play(&scheduled, &config, &cancel).await,
            Ok(Selection::Idle) => {
                shared.set_current(None);
                if shared.transition(StreamState::Starting).is_err() {
                    break;
                }
                debug!(
                    channel_id,
                    "No approved items, checking again in {:?}", shared.settings.retry.idle_poll
                );
                if sleep_or_cancel(&cancel, shared.settings.retry.idle_poll).await {
                    Step::Continue
                } else {
                    Step::Halt
                }
            }
            Err(e) => shared.on_failure(&cancel, format!("queue read failed: {e}")).await,
        };

        if step == Step::Halt {
            break;
        }
    }

    debug!(channel_id, "Stream loop exited");
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn existing(path: Option<&Path>) -> Option<PathBuf> {
    let path = path?;
    tokio::fs::try_exists(path)
        .await
        .unwrap_or(false)
        .then(|| path.to_path_buf())
}
