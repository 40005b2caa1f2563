//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Pending upload/download/delete operations
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL DEFAULT '{}',
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    next_retry_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, next_retry_at);

-- Append-only mutation history
CREATE TABLE IF NOT EXISTS change_log (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    version INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    origin TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_log_item ON change_log(item_id);
CREATE INDEX IF NOT EXISTS idx_change_log_origin ON change_log(item_id, origin);

-- Conflict audit trail, never updated
CREATE TABLE IF NOT EXISTS conflict_log (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL,
    local_timestamp TEXT NOT NULL,
    remote_timestamp TEXT NOT NULL,
    resolution TEXT NOT NULL,
    detected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conflict_log_item ON conflict_log(item_id);

-- Current state of every syncable item
CREATE TABLE IF NOT EXISTS sync_items (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    content_digest TEXT,
    data TEXT NOT NULL DEFAULT 'null',
    pushed_version INTEGER NOT NULL DEFAULT 0,
    synced_entry TEXT
);

-- Engine bookkeeping (watermark, push sequence)
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
