//! Channel-scoped filesystem layout for generated assets.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::{ChannelId, ItemId};
use crate::{Error, Result};

/// `<data_dir>/channels/<id>/{frames,segments}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    root: PathBuf,
}

impl ChannelPaths {
    pub fn new(data_dir: &Path, channel_id: ChannelId) -> Self {
        Self {
            root: data_dir.join("channels").join(channel_id.to_string()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join("frames")
    }

    pub fn segments_dir(&self) -> PathBuf {
        self.root.join("segments")
    }

    pub fn card_path(&self, item_id: ItemId) -> PathBuf {
        self.frames_dir().join(format!("item_{item_id}.png"))
    }

    pub fn overlay_path(&self, item_id: ItemId) -> PathBuf {
        self.frames_dir().join(format!("overlay_{item_id}.png"))
    }

    pub fn transition_path(&self) -> PathBuf {
        self.segments_dir().join("transition.png")
    }

    /// Create the channel directories.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [self.frames_dir(), self.segments_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| Error::io_path("creating", &dir, e))?;
        }
        Ok(())
    }

    /// Delete generated frames and segments. Missing directories are fine.
    pub async fn clear_transient(&self) -> Result<()> {
        for dir in [self.frames_dir(), self.segments_dir()] {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => debug!("Removed {}", dir.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io_path("removing", &dir, e)),
            }
        }
        Ok(())
    }
}
