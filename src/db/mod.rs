//! Database module for SQLite persistence
//!
//! Holds the durable sync queue, the change log, the conflict audit trail,
//! item snapshots, and engine bookkeeping (watermark, push sequence).

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::{Result, SyncError};

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}

/// Create an in-memory database.
///
/// Every SQLite connection to `:memory:` is a separate database, so the pool
/// is limited to a single connection.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(format!("timestamp {:?}: {}", value, e)))
}

/// Wrap a malformed column value as a database decode error
pub(crate) fn decode_error(message: String) -> SyncError {
    SyncError::Database(sqlx::Error::Decode(message.into()))
}
