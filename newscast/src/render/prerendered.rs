//! Generator backed by frames rendered ahead of time.

use async_trait::async_trait;

use super::traits::{AssetGenerator, AssetKind, RenderRequest, RenderedAsset};
use crate::domain::ChannelId;
use crate::{Error, Result};

/// Uses each item's stored `frame_path`.
///
/// A missing or stale path is a rendering fault.
#[derive(Debug, Default, Clone)]
pub struct StaticAssetGenerator;

impl StaticAssetGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AssetGenerator for StaticAssetGenerator {
    async fn render(&self, request: RenderRequest<'_>) -> Result<RenderedAsset> {
        let item = request.item;
        let path = item
            .frame_path
            .as_ref()
            .ok_or_else(|| Error::render(format!("item {} has no rendered frame", item.id)))?;

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(Error::render(format!(
                "frame for item {} is missing: {}",
                item.id,
                path.display()
            )));
        }

        Ok(RenderedAsset {
            path: path.clone(),
            kind: AssetKind::from_path(path),
        })
    }

    async fn render_transition(&self, _channel_id: ChannelId) -> Result<Option<RenderedAsset>> {
        Ok(None)
    }
}
