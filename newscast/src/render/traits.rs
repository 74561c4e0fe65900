//! Asset generator trait and types.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;
use crate::domain::{ChannelId, DisplayMode, QueueItem};

/// Kind of a rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AssetKind {
    /// A still image. In broadcast mode it is the overlay composited over
    /// the background video.
    Image,
    /// A short pre-rendered video.
    Clip,
}

impl AssetKind {
    /// Infer the kind from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("mp4" | "mov" | "mkv" | "webm" | "flv" | "ts") => Self::Clip,
            _ => Self::Image,
        }
    }
}

/// A renderable artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAsset {
    pub path: PathBuf,
    pub kind: AssetKind,
}

impl RenderedAsset {
    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: AssetKind::Image,
        }
    }

    pub fn clip(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: AssetKind::Clip,
        }
    }
}

/// Input for rendering one segment.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub channel_id: ChannelId,
    pub item: &'a QueueItem,
    /// Upcoming items, in playback order.
    pub neighbors: &'a [QueueItem],
    pub display_mode: DisplayMode,
}

/// Turns queue items into renderable artifacts.
///
/// Implementations may be slow. Callers cancel by dropping the future, so
/// any child process must be spawned with `kill_on_drop`.
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    /// Render the asset for one item.
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedAsset>;

    /// Render the interstitial shown between segments, if the generator
    /// provides one.
    async fn render_transition(&self, channel_id: ChannelId) -> Result<Option<RenderedAsset>>;

    /// Remove transient artifacts for a stopped channel.
    async fn clear(&self, _channel_id: ChannelId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(AssetKind::from_path(Path::new("a/b.PNG")), AssetKind::Image);
        assert_eq!(AssetKind::from_path(Path::new("seg.mp4")), AssetKind::Clip);
        assert_eq!(AssetKind::from_path(Path::new("noext")), AssetKind::Image);
    }
}
