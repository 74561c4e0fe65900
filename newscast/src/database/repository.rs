//! SQLite-backed item store.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::models::{ChannelDbModel, QueueItemDbModel};
use super::now_ms;
use crate::domain::{ChannelId, ItemId, ItemStatus, QueueItem};
use crate::store::ItemStore;
use crate::{Error, Result};

/// Item store over the `queue_items` and `channels` tables.
#[derive(Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
}

impl SqliteItemStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new item as pending.
    ///
    /// Returns `None` when the channel already holds an item with the same
    /// source URL.
    pub async fn insert_item(&self, item: &QueueItem) -> Result<Option<ItemId>> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO queue_items \
             (channel_id, title, summary, source_name, source_url, status, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.channel_id)
        .bind(&item.title)
        .bind(&item.summary)
        .bind(&item.source_name)
        .bind(&item.source_url)
        .bind(ItemStatus::Pending.as_str())
        .bind(item.fetched_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(result.last_insert_rowid()))
    }

    /// Change an item's status. Approving stamps the playback ordering key.
    pub async fn set_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let result = if status == ItemStatus::Approved {
            sqlx::query("UPDATE queue_items SET status = ?, approved_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?
        } else {
            sqlx::query("UPDATE queue_items SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(Error::not_found("QueueItem", id));
        }
        Ok(())
    }

    /// Record the artifact generated for an item.
    pub async fn set_frame_path(&self, id: ItemId, path: &Path) -> Result<()> {
        sqlx::query("UPDATE queue_items SET frame_path = ? WHERE id = ?")
            .bind(path.to_string_lossy().as_ref())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_item(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelDbModel>> {
        let channels =
            sqlx::query_as::<_, ChannelDbModel>("SELECT * FROM channels ORDER BY created_at ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(channels)
    }

    pub async fn insert_channel(&self, name: &str) -> Result<ChannelId> {
        let result = sqlx::query("INSERT INTO channels (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now_ms())
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    /// Create a default channel if none exists yet.
    pub async fn ensure_default_channel(&self) -> Result<()> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM channels")
            .fetch_one(&self.pool)
            .await?;
        if count == 0 {
            let id = self.insert_channel("Main").await?;
            tracing::info!(channel_id = id, "Created default channel");
        }
        Ok(())
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn list_approved(&self, channel_id: ChannelId, limit: usize) -> Result<Vec<QueueItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, QueueItemDbModel>(
            "SELECT * FROM queue_items \
             WHERE status = ? AND channel_id = ? \
             ORDER BY approved_at ASC, id ASC \
             LIMIT ?",
        )
        .bind(ItemStatus::Approved.as_str())
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(QueueItemDbModel::into_domain).collect())
    }

    async fn get(&self, id: ItemId) -> Result<Option<QueueItem>> {
        let row = sqlx::query_as::<_, QueueItemDbModel>("SELECT * FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(QueueItemDbModel::into_domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{init_pool, run_migrations};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqliteItemStore, ChannelId) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let pool = init_pool(&url).await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");

        let store = SqliteItemStore::new(pool);
        let channel = store.insert_channel("Test").await.unwrap();
        (dir, store, channel)
    }

    fn draft(channel: ChannelId, title: &str) -> QueueItem {
        QueueItem::new(0, channel, title).with_source("Wire", format!("https://example.com/{title}"))
    }

    #[tokio::test]
    async fn test_list_approved_fifo_by_approval() {
        let (_dir, store, channel) = setup().await;

        let a = store.insert_item(&draft(channel, "a")).await.unwrap().unwrap();
        let b = store.insert_item(&draft(channel, "b")).await.unwrap().unwrap();
        let c = store.insert_item(&draft(channel, "c")).await.unwrap().unwrap();

        // Approve out of insertion order; playback follows approval order.
        store.set_status(b, ItemStatus::Approved).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.set_status(a, ItemStatus::Approved).await.unwrap();

        let ids: Vec<_> = store
            .list_approved(channel, 25)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(ids, vec![b, a]);

        assert_eq!(store.get(c).await.unwrap().unwrap().status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_source_url_ignored() {
        let (_dir, store, channel) = setup().await;

        assert!(store.insert_item(&draft(channel, "x")).await.unwrap().is_some());
        assert!(store.insert_item(&draft(channel, "x")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_missing_and_delete() {
        let (_dir, store, channel) = setup().await;
        assert!(store.get(42).await.unwrap().is_none());

        let id = store.insert_item(&draft(channel, "gone")).await.unwrap().unwrap();
        assert!(store.delete_item(id).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
        assert!(matches!(
            store.set_status(id, ItemStatus::Approved).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_frame_path_and_channels() {
        let (_dir, store, channel) = setup().await;
        let id = store.insert_item(&draft(channel, "framed")).await.unwrap().unwrap();

        store
            .set_frame_path(id, Path::new("/data/frames/item_1.png"))
            .await
            .unwrap();
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.frame_path.as_deref(), Some(Path::new("/data/frames/item_1.png")));

        store.ensure_default_channel().await.unwrap();
        let channels = store.list_channels().await.unwrap();
        assert_eq!(channels.len(), 1, "default channel must not be added when one exists");
        assert_eq!(channels[0].name, "Test");
    }
}
