//! Scripted collaborators for driving supervisors without ffmpeg.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use newscast::broadcast::{ChannelManager, RetryPolicy, SupervisorDeps, SupervisorSettings};
use newscast::config::ChannelConfig;
use newscast::domain::{ChannelId, ItemId, QueueItem};
use newscast::encoder::{
    Encoder, EncoderInvocation, EncoderOutcome, EncoderProfile, PlaybackMode, SegmentRequest,
};
use newscast::render::{AssetGenerator, RenderRequest, RenderedAsset};
use newscast::store::MemoryItemStore;
use newscast::{Error, Result};

/// What the fake encoder does for one run.
#[derive(Debug, Clone)]
pub enum Script {
    /// Exit cleanly after the delay.
    Succeed(Duration),
    /// Exit with a failure after the delay.
    Fail(Duration),
    /// Run until cancelled.
    Hang,
    /// Ignore cancellation entirely.
    Wedge,
}

/// Encoder that follows a script and records what it was asked to play.
pub struct ScriptedEncoder {
    script: Mutex<VecDeque<Script>>,
    fallback: Script,
    builds: AtomicUsize,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    played: Mutex<Vec<PathBuf>>,
    requests: Mutex<Vec<SegmentRequest>>,
}

impl ScriptedEncoder {
    pub fn new(script: impl IntoIterator<Item = Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            builds: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            played: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(script: Script) -> Arc<Self> {
        Self::new([], script)
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn step(&self, cancel: &CancellationToken) -> EncoderOutcome {
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (delay, outcome) = match step {
            Script::Succeed(delay) => (delay, EncoderOutcome::Success),
            Script::Fail(delay) => (
                delay,
                EncoderOutcome::failed(Some(1), "Connection refused"),
            ),
            Script::Hang => {
                cancel.cancelled().await;
                return EncoderOutcome::Cancelled;
            }
            Script::Wedge => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => EncoderOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => outcome,
        }
    }

    /// Asset paths in the order they were streamed.
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().clone()
    }

    pub fn requests(&self) -> Vec<SegmentRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Encoder for ScriptedEncoder {
    fn build(&self, request: &SegmentRequest) -> EncoderInvocation {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let asset = match &request.mode {
            PlaybackMode::SingleImage { image } => image.clone(),
            PlaybackMode::Clip { video } => video.clone(),
            PlaybackMode::LoopedBackgroundWithOverlay { overlay, .. } => overlay.clone(),
        };
        self.played.lock().push(asset);
        self.requests.lock().push(request.clone());
        EncoderInvocation::build("fake-encoder", &EncoderProfile::default(), request)
    }

    async fn run(&self, _invocation: &EncoderInvocation, cancel: &CancellationToken) -> EncoderOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let outcome = self.step(cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// Generator that names each asset after its item and can be told to fail.
#[derive(Default)]
pub struct FakeGenerator {
    renders: AtomicUsize,
    failures_left: AtomicUsize,
    clears: AtomicUsize,
    transition: Option<PathBuf>,
}

impl FakeGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the first `n` renders.
    pub fn failing(n: usize) -> Arc<Self> {
        let generator = Self::default();
        generator.failures_left.store(n, Ordering::SeqCst);
        Arc::new(generator)
    }

    pub fn with_transition(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            transition: Some(path.into()),
            ..Self::default()
        })
    }

    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

pub fn asset_path(item_id: ItemId) -> PathBuf {
    PathBuf::from(format!("/frames/item_{item_id}.png"))
}

#[async_trait]
impl AssetGenerator for FakeGenerator {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedAsset> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::render("font missing"));
        }
        Ok(RenderedAsset::image(asset_path(request.item.id)))
    }

    async fn render_transition(&self, _channel_id: ChannelId) -> Result<Option<RenderedAsset>> {
        Ok(self.transition.clone().map(RenderedAsset::image))
    }

    async fn clear(&self, _channel_id: ChannelId) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Approved item `id`, approved `order` seconds after a fixed epoch.
pub fn approved_item(id: ItemId, order: i64) -> QueueItem {
    let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    QueueItem::new(id, 1, format!("Story {id}")).approved(base + ChronoDuration::seconds(order))
}

pub fn channel_config() -> ChannelConfig {
    ChannelConfig {
        stream_key: "test-key".to_string(),
        ingest_url: "rtmp://ingest.test/live".to_string(),
        display_seconds: 1,
        transition_secs: 0,
        ..ChannelConfig::default()
    }
}

pub fn fast_settings(max_failures: u32) -> SupervisorSettings {
    SupervisorSettings {
        retry: RetryPolicy {
            max_consecutive_failures: max_failures,
            base_delay: Duration::from_millis(10),
            idle_poll: Duration::from_millis(20),
            ..RetryPolicy::default()
        },
        playlist_limit: 25,
        stop_timeout: Duration::from_secs(2),
        background_video: None,
        music_bed: None,
    }
}

pub fn manager(
    store: Arc<MemoryItemStore>,
    generator: Arc<FakeGenerator>,
    encoder: Arc<ScriptedEncoder>,
    settings: SupervisorSettings,
    config: ChannelConfig,
) -> Arc<ChannelManager> {
    let deps = SupervisorDeps {
        store,
        generator,
        encoder,
    };
    Arc::new(ChannelManager::new(deps, settings, config))
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
