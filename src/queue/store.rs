//! Sync queue persistence
//!
//! SQLite mirror of the in-memory queue so pending work survives restarts.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{decode_error, parse_timestamp};
use crate::error::Result;

use super::types::{QueueItem, QueueOperation, QueueStatus};

/// Repository for queue persistence
#[derive(Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace an item
    pub async fn upsert(&self, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, operation, payload, retry_count, max_retries,
                next_retry_at, status, created_at, updated_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                retry_count = excluded.retry_count,
                next_retry_at = excluded.next_retry_at,
                status = excluded.status,
                updated_at = excluded.updated_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.operation.as_str())
        .bind(&payload)
        .bind(item.retry_count as i64)
        .bind(item.max_retries as i64)
        .bind(item.next_retry_at)
        .bind(item.status.as_str())
        .bind(item.created_at.to_rfc3339())
        .bind(item.updated_at.to_rfc3339())
        .bind(&item.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Load every persisted item, oldest first
    pub async fn load_all(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, operation, payload, retry_count, max_retries,
                   next_retry_at, status, created_at, updated_at, last_error
            FROM sync_queue
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_item()).collect()
    }
}

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    operation: String,
    payload: String,
    retry_count: i64,
    max_retries: i64,
    next_retry_at: i64,
    status: String,
    created_at: String,
    updated_at: String,
    last_error: Option<String>,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem> {
        let id = Uuid::parse_str(&self.id).map_err(|e| decode_error(e.to_string()))?;
        let operation: QueueOperation = self.operation.parse().map_err(decode_error)?;
        let status: QueueStatus = self.status.parse().map_err(decode_error)?;

        Ok(QueueItem {
            id,
            operation,
            payload: serde_json::from_str(&self.payload)?,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            next_retry_at: self.next_retry_at,
            status,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            last_error: self.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::db::create_memory_pool;
    use crate::queue::types::payload;

    #[tokio::test]
    async fn test_upsert_and_load() {
        let pool = create_memory_pool().await.unwrap();
        let repo = QueueRepository::new(pool);

        let mut item = QueueItem::new(QueueOperation::Upload, payload([("item_id", "A")]), 3);
        repo.upsert(&item).await.unwrap();

        item.record_failure("timeout", Utc::now());
        repo.upsert(&item).await.unwrap();

        let loaded = repo.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, item.id);
        assert_eq!(loaded[0].retry_count, 1);
        assert_eq!(loaded[0].next_retry_at, item.next_retry_at);
        assert_eq!(loaded[0].payload_value("item_id"), Some("A"));
        assert_eq!(loaded[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_delete() {
        let pool = create_memory_pool().await.unwrap();
        let repo = QueueRepository::new(pool);

        let a = QueueItem::new(QueueOperation::Upload, payload([("item_id", "A")]), 3);
        let b = QueueItem::new(QueueOperation::Delete, payload([("item_id", "B")]), 3);
        repo.upsert(&a).await.unwrap();
        repo.upsert(&b).await.unwrap();

        repo.delete(a.id).await.unwrap();
        assert_eq!(repo.load_all().await.unwrap().len(), 1);

        assert_eq!(repo.delete_all().await.unwrap(), 1);
        assert!(repo.load_all().await.unwrap().is_empty());
    }
}
