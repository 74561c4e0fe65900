//! In-process item store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::ItemStore;
use crate::Result;
use crate::domain::{ChannelId, ItemId, ItemStatus, QueueItem};

/// Item store backed by a vector behind a lock.
///
/// Useful for demos and tests; mutations are visible to the next snapshot.
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<Vec<QueueItem>>,
    list_calls: AtomicUsize,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = QueueItem>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().collect()),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Insert or replace an item.
    pub fn upsert(&self, item: QueueItem) {
        let mut items = self.items.write();
        match items.iter_mut().find(|existing| existing.id == item.id) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }
    }

    /// Delete an item. Returns whether it existed.
    pub fn remove(&self, id: ItemId) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|item| item.id != id);
        items.len() != before
    }

    pub fn set_status(&self, id: ItemId, status: ItemStatus) -> bool {
        let mut items = self.items.write();
        match items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Number of snapshot reads served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn list_approved(&self, channel_id: ChannelId, limit: usize) -> Result<Vec<QueueItem>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let mut approved: Vec<QueueItem> = self
            .items
            .read()
            .iter()
            .filter(|item| item.channel_id == channel_id && item.is_approved())
            .cloned()
            .collect();

        approved.sort_by(|a, b| a.approved_at.cmp(&b.approved_at).then(a.id.cmp(&b.id)));
        approved.truncate(limit);
        Ok(approved)
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>> {
        Ok(self.items.read().iter().find(|item| item.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_list_approved_orders_by_approval_time() {
        let t0 = Utc::now();
        let store = MemoryItemStore::with_items([
            QueueItem::new(3, 1, "third").approved(t0 + Duration::seconds(20)),
            QueueItem::new(1, 1, "first").approved(t0),
            QueueItem::new(2, 1, "second").approved(t0 + Duration::seconds(10)),
            QueueItem::new(4, 1, "pending"),
            QueueItem::new(5, 2, "other channel").approved(t0),
        ]);

        let ids: Vec<_> = store
            .list_approved(1, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let capped = store.list_approved(1, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(store.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_mutations_visible_to_next_snapshot() {
        let store = MemoryItemStore::new();
        store.upsert(QueueItem::new(1, 1, "a").approved(Utc::now()));
        assert_eq!(store.list_approved(1, 10).await.unwrap().len(), 1);

        assert!(store.set_status(1, ItemStatus::Rejected));
        assert!(store.list_approved(1, 10).await.unwrap().is_empty());
        assert!(store.get(1).await.unwrap().is_some());

        assert!(store.remove(1));
        assert!(!store.remove(1));
        assert!(store.get(1).await.unwrap().is_none());
    }
}
