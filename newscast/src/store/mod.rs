//! Item store contract consumed by the playlist scheduler.
//!
//! The broadcast core only reads from the store. Writes (approval, frame
//! paths) belong to administration and the asset side channel.

mod memory;

pub use memory::MemoryItemStore;

use async_trait::async_trait;

use crate::Result;
use crate::domain::{ChannelId, ItemId, QueueItem};

/// Read access to the approved queue.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Approved items of a channel, oldest approval first, at most `limit`.
    async fn list_approved(&self, channel_id: ChannelId, limit: usize) -> Result<Vec<QueueItem>>;

    /// Look an item up by id. `None` if it no longer exists.
    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>>;
}
