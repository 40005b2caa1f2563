//! Sync state persistence
//!
//! SQLite storage for items, the change log, conflicts, and sync bookkeeping.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{decode_error, parse_timestamp};
use crate::error::Result;

use super::repository::Repository;
use super::types::{ChangeLogEntry, ConflictRecord, OperationType, Resolution, SyncItem, Watermark};

const WATERMARK_KEY: &str = "watermark";
const PUSH_SEQUENCE_KEY: &str = "push_sequence";

/// Repository for sync state persistence
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const UPSERT_ITEM_SQL: &str = r#"
    INSERT INTO sync_items (
        id, version, updated_at, deleted, content_digest, data, pushed_version, synced_entry
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        version = excluded.version,
        updated_at = excluded.updated_at,
        deleted = excluded.deleted,
        content_digest = excluded.content_digest,
        data = excluded.data,
        pushed_version = excluded.pushed_version,
        synced_entry = excluded.synced_entry
"#;

const INSERT_CHANGE_SQL: &str = r#"
    INSERT INTO change_log (id, item_id, operation, version, timestamp, origin)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const CHANGE_COLUMNS: &str = "id, item_id, operation, version, timestamp, origin";

#[async_trait]
impl Repository for SqliteRepository {
    async fn get_item(&self, id: &str) -> Result<Option<SyncItem>> {
        let row = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT id, version, updated_at, deleted, content_digest, data, pushed_version,
                synced_entry
            FROM sync_items
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_item()).transpose()
    }

    async fn append_change(&self, entry: &ChangeLogEntry) -> Result<()> {
        sqlx::query(INSERT_CHANGE_SQL)
            .bind(entry.id.to_string())
            .bind(&entry.item_id)
            .bind(entry.operation.as_str())
            .bind(entry.version as i64)
            .bind(entry.timestamp.to_rfc3339())
            .bind(&entry.origin)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn apply_change(&self, item: &SyncItem, entry: &ChangeLogEntry) -> Result<()> {
        let data = serde_json::to_string(&item.data)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_ITEM_SQL)
            .bind(&item.id)
            .bind(item.version as i64)
            .bind(item.updated_at.to_rfc3339())
            .bind(item.deleted)
            .bind(&item.content_digest)
            .bind(&data)
            .bind(item.pushed_version as i64)
            .bind(item.synced_entry.map(|id| id.to_string()))
            .execute(&mut *tx)
            .await?;

        sqlx::query(INSERT_CHANGE_SQL)
            .bind(entry.id.to_string())
            .bind(&entry.item_id)
            .bind(entry.operation.as_str())
            .bind(entry.version as i64)
            .bind(entry.timestamp.to_rfc3339())
            .bind(&entry.origin)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn last_change(&self, item_id: &str) -> Result<Option<ChangeLogEntry>> {
        let row = sqlx::query_as::<_, ChangeRow>(&format!(
            "SELECT {} FROM change_log WHERE item_id = ? ORDER BY rowid DESC LIMIT 1",
            CHANGE_COLUMNS
        ))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entry()).transpose()
    }

    async fn last_change_from(
        &self,
        item_id: &str,
        origin: &str,
    ) -> Result<Option<ChangeLogEntry>> {
        let row = sqlx::query_as::<_, ChangeRow>(&format!(
            "SELECT {} FROM change_log WHERE item_id = ? AND origin = ? ORDER BY rowid DESC LIMIT 1",
            CHANGE_COLUMNS
        ))
        .bind(item_id)
        .bind(origin)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entry()).transpose()
    }

    async fn last_version(&self, item_id: &str) -> Result<u64> {
        let (version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM change_log WHERE item_id = ?")
                .bind(item_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(version as u64)
    }

    async fn has_change(&self, id: Uuid) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM change_log WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn record_conflict(&self, record: &ConflictRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO conflict_log (
                id, item_id, local_timestamp, remote_timestamp, resolution, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.item_id)
        .bind(record.local_timestamp.to_rfc3339())
        .bind(record.remote_timestamp.to_rfc3339())
        .bind(record.resolution.as_str())
        .bind(record.detected_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_conflict(&self, id: Uuid) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM conflict_log WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn conflicts(&self, item_id: Option<&str>) -> Result<Vec<ConflictRecord>> {
        let rows = sqlx::query_as::<_, ConflictRow>(
            r#"
            SELECT id, item_id, local_timestamp, remote_timestamp, resolution, detected_at
            FROM conflict_log
            WHERE ? IS NULL OR item_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(item_id)
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn watermark(&self) -> Result<Watermark> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_state WHERE key = ?")
            .bind(WATERMARK_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((value,)) => Ok(serde_json::from_str(&value)?),
            None => Ok(Watermark::new()),
        }
    }

    async fn set_watermark(&self, watermark: &Watermark) -> Result<()> {
        let value = serde_json::to_string(watermark)?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(WATERMARK_KEY)
        .bind(&value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn next_push_sequence(&self) -> Result<u64> {
        let (value,): (String,) = sqlx::query_as(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?, '1')
            ON CONFLICT(key) DO UPDATE SET value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)
            RETURNING value
            "#,
        )
        .bind(PUSH_SEQUENCE_KEY)
        .fetch_one(&self.pool)
        .await?;

        value
            .parse()
            .map_err(|_| decode_error(format!("push sequence {:?}", value)))
    }

    async fn mark_pushed(&self, item_id: &str, version: u64, entry: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_items SET
                synced_entry = CASE WHEN ? >= pushed_version THEN ? ELSE synced_entry END,
                pushed_version = MAX(pushed_version, ?)
            WHERE id = ?
            "#,
        )
        .bind(version as i64)
        .bind(entry.to_string())
        .bind(version as i64)
        .bind(item_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    version: i64,
    updated_at: String,
    deleted: bool,
    content_digest: Option<String>,
    data: String,
    pushed_version: i64,
    synced_entry: Option<String>,
}

impl ItemRow {
    fn into_item(self) -> Result<SyncItem> {
        Ok(SyncItem {
            id: self.id,
            version: self.version as u64,
            updated_at: parse_timestamp(&self.updated_at)?,
            deleted: self.deleted,
            content_digest: self.content_digest,
            data: serde_json::from_str(&self.data)?,
            pushed_version: self.pushed_version as u64,
            synced_entry: self
                .synced_entry
                .map(|id| Uuid::parse_str(&id).map_err(|e| decode_error(e.to_string())))
                .transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: String,
    item_id: String,
    operation: String,
    version: i64,
    timestamp: String,
    origin: String,
}

impl ChangeRow {
    fn into_entry(self) -> Result<ChangeLogEntry> {
        let id = Uuid::parse_str(&self.id).map_err(|e| decode_error(e.to_string()))?;
        let operation: OperationType = self.operation.parse().map_err(decode_error)?;

        Ok(ChangeLogEntry {
            id,
            item_id: self.item_id,
            operation,
            version: self.version as u64,
            timestamp: parse_timestamp(&self.timestamp)?,
            origin: self.origin,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConflictRow {
    id: String,
    item_id: String,
    local_timestamp: String,
    remote_timestamp: String,
    resolution: String,
    detected_at: String,
}

impl ConflictRow {
    fn into_record(self) -> Result<ConflictRecord> {
        let id = Uuid::parse_str(&self.id).map_err(|e| decode_error(e.to_string()))?;
        let resolution: Resolution = self.resolution.parse().map_err(decode_error)?;

        Ok(ConflictRecord {
            id,
            item_id: self.item_id,
            local_timestamp: parse_timestamp(&self.local_timestamp)?,
            remote_timestamp: parse_timestamp(&self.remote_timestamp)?,
            resolution,
            detected_at: parse_timestamp(&self.detected_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use chrono::Utc;

    async fn setup() -> SqliteRepository {
        SqliteRepository::new(create_memory_pool().await.unwrap())
    }

    fn item(id: &str, version: u64) -> SyncItem {
        SyncItem {
            id: id.to_string(),
            version,
            updated_at: Utc::now(),
            deleted: false,
            content_digest: None,
            data: serde_json::json!({"title": id}),
            pushed_version: 0,
            synced_entry: None,
        }
    }

    #[tokio::test]
    async fn test_apply_change_and_history() {
        let repo = setup().await;

        let first = ChangeLogEntry::new("a", OperationType::Create, 1, Utc::now(), "dev-a");
        repo.apply_change(&item("a", 1), &first).await.unwrap();
        let second = ChangeLogEntry::new("a", OperationType::Update, 2, Utc::now(), "dev-b");
        repo.apply_change(&item("a", 2), &second).await.unwrap();

        let stored = repo.get_item("a").await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.data["title"], "a");

        assert_eq!(repo.last_version("a").await.unwrap(), 2);
        assert_eq!(repo.last_version("missing").await.unwrap(), 0);
        assert_eq!(repo.last_change("a").await.unwrap(), Some(second.clone()));
        assert_eq!(
            repo.last_change_from("a", "dev-a").await.unwrap(),
            Some(first.clone())
        );
        assert!(repo.has_change(first.id).await.unwrap());
        assert!(repo.has_change(second.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_change_rejected() {
        let repo = setup().await;
        let entry = ChangeLogEntry::new("a", OperationType::Create, 1, Utc::now(), "dev-a");

        repo.append_change(&entry).await.unwrap();
        assert!(repo.append_change(&entry).await.is_err());
    }

    #[tokio::test]
    async fn test_conflict_records_are_unique() {
        let repo = setup().await;
        let record = ConflictRecord {
            id: Uuid::new_v4(),
            item_id: "a".to_string(),
            local_timestamp: Utc::now(),
            remote_timestamp: Utc::now(),
            resolution: Resolution::LastWriteWins,
            detected_at: Utc::now(),
        };

        assert!(repo.record_conflict(&record).await.unwrap());
        assert!(!repo.record_conflict(&record).await.unwrap());
        assert!(repo.has_conflict(record.id).await.unwrap());
        assert_eq!(repo.conflicts(Some("a")).await.unwrap(), vec![record.clone()]);
        assert_eq!(repo.conflicts(None).await.unwrap().len(), 1);
        assert!(repo.conflicts(Some("b")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bookkeeping() {
        let repo = setup().await;

        assert_eq!(repo.next_push_sequence().await.unwrap(), 1);
        assert_eq!(repo.next_push_sequence().await.unwrap(), 2);

        let mut watermark = repo.watermark().await.unwrap();
        assert_eq!(watermark.get("dev-b"), 0);
        watermark.advance("dev-b", 7);
        repo.set_watermark(&watermark).await.unwrap();
        assert_eq!(repo.watermark().await.unwrap().get("dev-b"), 7);

        let entry = ChangeLogEntry::new("a", OperationType::Create, 3, Utc::now(), "dev-a");
        repo.apply_change(&item("a", 3), &entry).await.unwrap();
        repo.mark_pushed("a", 3, entry.id).await.unwrap();
        repo.mark_pushed("a", 2, Uuid::new_v4()).await.unwrap();

        let stored = repo.get_item("a").await.unwrap().unwrap();
        assert_eq!(stored.pushed_version, 3);
        assert_eq!(stored.synced_entry, Some(entry.id));
    }
}
