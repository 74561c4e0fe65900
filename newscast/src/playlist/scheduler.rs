//! Playlist cursor over approved-queue snapshots.

use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::domain::{ChannelId, ItemId, QueueItem};
use crate::store::ItemStore;

/// Number of upcoming items handed to the renderer.
pub const DEFAULT_NEIGHBOR_COUNT: usize = 5;

/// An item chosen for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledItem {
    /// The item as freshly read from the store.
    pub item: QueueItem,
    /// Items following it in playback order, wrapping around.
    pub neighbors: Vec<QueueItem>,
    /// Index within the snapshot the item was taken from.
    pub position: usize,
    /// Length of that snapshot.
    pub cycle_len: usize,
}

/// Outcome of asking for the next item.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Nothing is approved; poll again later.
    Idle,
    Item(ScheduledItem),
}

impl Selection {
    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            Self::Idle => None,
            Self::Item(scheduled) => Some(scheduled.item.id),
        }
    }
}

/// Infinite round-robin over one channel's approved items.
///
/// The snapshot is re-read at the start of every wrap, so newly approved
/// items join the rotation on the next cycle. Items that disappear or lose
/// their approval between snapshot and selection are skipped.
pub struct PlaylistScheduler {
    channel_id: ChannelId,
    store: Arc<dyn ItemStore>,
    limit: usize,
    neighbor_count: usize,
    snapshot: Vec<QueueItem>,
    cursor: usize,
}

impl PlaylistScheduler {
    pub fn new(channel_id: ChannelId, store: Arc<dyn ItemStore>, limit: usize) -> Self {
        Self {
            channel_id,
            store,
            limit: limit.max(1),
            neighbor_count: DEFAULT_NEIGHBOR_COUNT,
            snapshot: Vec::new(),
            cursor: 0,
        }
    }

    pub fn with_neighbor_count(mut self, count: usize) -> Self {
        self.neighbor_count = count;
        self
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Forget the current snapshot; the next call starts a fresh cycle.
    pub fn reset(&mut self) {
        self.snapshot.clear();
        self.cursor = 0;
    }

    /// Pick the next item to play.
    ///
    /// Store faults are returned to the caller; the cursor is left intact.
    pub async fn next(&mut self) -> Result<Selection> {
        let mut refreshed = false;
        loop {
            if self.cursor >= self.snapshot.len() {
                if refreshed {
                    // Everything in a fresh snapshot vanished before selection.
                    return Ok(Selection::Idle);
                }
                self.refresh().await?;
                refreshed = true;
                if self.snapshot.is_empty() {
                    return Ok(Selection::Idle);
                }
            }

            let index = self.cursor;
            self.cursor += 1;
            let id = self.snapshot[index].id;

            match self.store.get(id).await? {
                Some(item) if item.is_approved() && item.channel_id == self.channel_id => {
                    return Ok(Selection::Item(ScheduledItem {
                        neighbors: self.neighbors_of(index),
                        position: index,
                        cycle_len: self.snapshot.len(),
                        item,
                    }));
                }
                Some(_) => debug!(channel_id = self.channel_id, item_id = id, "Skipping item no longer approved"),
                None => debug!(channel_id = self.channel_id, item_id = id, "Skipping removed item"),
            }
        }
    }

    async fn refresh(&mut self) -> Result<()> {
        self.snapshot = self.store.list_approved(self.channel_id, self.limit).await?;
        self.cursor = 0;
        debug!(
            channel_id = self.channel_id,
            items = self.snapshot.len(),
            "Playlist snapshot refreshed"
        );
        Ok(())
    }

    /// Items after `index` followed by items before it.
    fn neighbors_of(&self, index: usize) -> Vec<QueueItem> {
        self.snapshot[index + 1..]
            .iter()
            .chain(self.snapshot[..index].iter())
            .take(self.neighbor_count)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::domain::ItemStatus;
    use crate::store::MemoryItemStore;

    fn item(id: ItemId, order: i64) -> QueueItem {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        QueueItem::new(id, 1, format!("Item {id}")).approved(base + Duration::seconds(order))
    }

    async fn take(scheduler: &mut PlaylistScheduler, n: usize) -> Vec<Option<ItemId>> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(scheduler.next().await.unwrap().item_id());
        }
        out
    }

    #[tokio::test]
    async fn test_round_robin_in_approval_order() {
        // Inserted out of order; approval time decides.
        let store = Arc::new(MemoryItemStore::with_items([item(3, 3), item(1, 1), item(2, 2)]));
        let mut scheduler = PlaylistScheduler::new(1, store, 25);

        assert_eq!(
            take(&mut scheduler, 7).await,
            vec![Some(1), Some(2), Some(3), Some(1), Some(2), Some(3), Some(1)]
        );
    }

    #[tokio::test]
    async fn test_removed_item_is_skipped() {
        let store = Arc::new(MemoryItemStore::with_items([item(1, 1), item(2, 2), item(3, 3)]));
        let mut scheduler = PlaylistScheduler::new(1, store.clone(), 25);

        assert_eq!(take(&mut scheduler, 1).await, vec![Some(1)]);
        assert!(store.remove(3));
        assert_eq!(
            take(&mut scheduler, 5).await,
            vec![Some(2), Some(1), Some(2), Some(1), Some(2)]
        );
    }

    #[tokio::test]
    async fn test_unapproved_item_is_skipped() {
        let store = Arc::new(MemoryItemStore::with_items([item(1, 1), item(2, 2)]));
        let mut scheduler = PlaylistScheduler::new(1, store.clone(), 25);

        assert_eq!(take(&mut scheduler, 1).await, vec![Some(1)]);
        store.set_status(2, ItemStatus::Rejected);
        assert_eq!(take(&mut scheduler, 2).await, vec![Some(1), Some(1)]);
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let store = Arc::new(MemoryItemStore::new());
        let mut scheduler = PlaylistScheduler::new(1, store.clone(), 25);

        assert_eq!(scheduler.next().await.unwrap(), Selection::Idle);
        assert_eq!(scheduler.next().await.unwrap(), Selection::Idle);
        assert_eq!(store.list_calls(), 2, "every idle poll re-reads the queue");
    }

    #[tokio::test]
    async fn test_new_items_join_on_wrap() {
        let store = Arc::new(MemoryItemStore::with_items([item(1, 1), item(2, 2)]));
        let mut scheduler = PlaylistScheduler::new(1, store.clone(), 25);

        assert_eq!(take(&mut scheduler, 1).await, vec![Some(1)]);
        store.upsert(item(3, 3));
        // Current cycle is unaffected; the next one includes the new item.
        assert_eq!(
            take(&mut scheduler, 4).await,
            vec![Some(2), Some(1), Some(2), Some(3)]
        );
    }

    #[tokio::test]
    async fn test_limit_caps_snapshot() {
        let store = Arc::new(MemoryItemStore::with_items((1..=10).map(|i| item(i, i))));
        let mut scheduler = PlaylistScheduler::new(1, store, 3);

        assert_eq!(
            take(&mut scheduler, 4).await,
            vec![Some(1), Some(2), Some(3), Some(1)]
        );
    }

    #[tokio::test]
    async fn test_neighbors_wrap_around() {
        let store = Arc::new(MemoryItemStore::with_items((1..=4).map(|i| item(i, i))));
        let mut scheduler = PlaylistScheduler::new(1, store, 25).with_neighbor_count(5);

        scheduler.next().await.unwrap();
        scheduler.next().await.unwrap();
        let Selection::Item(third) = scheduler.next().await.unwrap() else {
            panic!("expected an item");
        };
        let ids: Vec<ItemId> = third.neighbors.iter().map(|i| i.id).collect();
        assert_eq!(third.item.id, 3);
        assert_eq!(ids, vec![4, 1, 2]);
        assert_eq!(third.position, 2);
        assert_eq!(third.cycle_len, 4);
    }

    #[tokio::test]
    async fn test_other_channels_are_ignored() {
        let mut foreign = item(9, 0);
        foreign.channel_id = 2;
        let store = Arc::new(MemoryItemStore::with_items([foreign, item(1, 1)]));
        let mut scheduler = PlaylistScheduler::new(1, store, 25);

        assert_eq!(take(&mut scheduler, 2).await, vec![Some(1), Some(1)]);
    }
}
