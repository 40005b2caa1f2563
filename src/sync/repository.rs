//! Persistence seam used by the sync engine

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::types::{ChangeLogEntry, ConflictRecord, SyncItem, Watermark};

/// Local CRUD, change-log, and bookkeeping storage the engine depends on
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_item(&self, id: &str) -> Result<Option<SyncItem>>;

    /// Append a change log entry
    async fn append_change(&self, entry: &ChangeLogEntry) -> Result<()>;

    /// Store an item and the entry that produced it atomically
    async fn apply_change(&self, item: &SyncItem, entry: &ChangeLogEntry) -> Result<()>;

    /// Most recently appended entry for an item
    async fn last_change(&self, item_id: &str) -> Result<Option<ChangeLogEntry>>;

    /// Most recently appended entry for an item from one device
    async fn last_change_from(&self, item_id: &str, origin: &str)
        -> Result<Option<ChangeLogEntry>>;

    /// Highest recorded version for an item, 0 if none
    async fn last_version(&self, item_id: &str) -> Result<u64>;

    async fn has_change(&self, id: Uuid) -> Result<bool>;

    /// Persist a conflict record. Returns false if it was already recorded.
    async fn record_conflict(&self, record: &ConflictRecord) -> Result<bool>;

    async fn has_conflict(&self, id: Uuid) -> Result<bool>;

    /// Conflict records, optionally for a single item, oldest first
    async fn conflicts(&self, item_id: Option<&str>) -> Result<Vec<ConflictRecord>>;

    async fn watermark(&self) -> Result<Watermark>;

    async fn set_watermark(&self, watermark: &Watermark) -> Result<()>;

    /// Allocate the next sequence number for a published change record
    async fn next_push_sequence(&self) -> Result<u64>;

    /// Remember that `version` of an item has been published as `entry`
    async fn mark_pushed(&self, item_id: &str, version: u64, entry: Uuid) -> Result<()>;
}
