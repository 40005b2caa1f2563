//! Sync data types
//!
//! Defines types for multi-device synchronization including:
//! - Change log entries with per-item versions
//! - Item snapshots exchanged through the object store
//! - Conflict audit records
//! - Engine state, results, and events

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Types of item mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(format!("unknown operation type: {}", other)),
        }
    }
}

/// One immutable mutation of one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: Uuid,
    #[serde(rename = "itemId")]
    pub item_id: String,
    pub operation: OperationType,
    /// Strictly increasing per item
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Device that made the change
    pub origin: String,
}

impl ChangeLogEntry {
    pub fn new(
        item_id: &str,
        operation: OperationType,
        version: u64,
        timestamp: DateTime<Utc>,
        origin: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id: item_id.to_string(),
            operation,
            version,
            timestamp,
            origin: origin.to_string(),
        }
    }
}

/// Current state of a syncable item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    pub version: u64,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
    /// Digest of the item's blob in content-addressed storage
    #[serde(rename = "contentDigest", skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    /// Application metadata, opaque to the engine
    #[serde(default)]
    pub data: serde_json::Value,
    /// Highest local version already published; local bookkeeping only
    #[serde(skip)]
    pub pushed_version: u64,
    /// Last change this device shares with the others: the one it published
    /// or applied most recently. Local bookkeeping only.
    #[serde(skip)]
    pub synced_entry: Option<Uuid>,
}

impl SyncItem {
    /// Local mutations not yet published to the object store
    pub fn has_unpushed_changes(&self) -> bool {
        self.version > self.pushed_version
    }
}

/// A change record as stored remotely: the entry plus the resulting item state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub entry: ChangeLogEntry,
    pub item: SyncItem,
    /// Shared change the publisher's edits were made on top of; `None` when
    /// the item was new to the publisher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Uuid>,
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    LastWriteWins,
    Manual,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::LastWriteWins => "last_write_wins",
            Resolution::Manual => "manual",
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_write_wins" => Ok(Resolution::LastWriteWins),
            "manual" => Ok(Resolution::Manual),
            other => Err(format!("unknown resolution: {}", other)),
        }
    }
}

/// Audit record of one detected conflict, never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    #[serde(rename = "itemId")]
    pub item_id: String,
    #[serde(rename = "localTimestamp")]
    pub local_timestamp: DateTime<Utc>,
    #[serde(rename = "remoteTimestamp")]
    pub remote_timestamp: DateTime<Utc>,
    pub resolution: Resolution,
    #[serde(rename = "detectedAt")]
    pub detected_at: DateTime<Utc>,
}

/// Last applied remote sequence per foreign device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(BTreeMap<String, u64>);

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last applied sequence for `device`, 0 if nothing was pulled yet
    pub fn get(&self, device: &str) -> u64 {
        self.0.get(device).copied().unwrap_or(0)
    }

    /// Move a device's mark forward; never moves backwards
    pub fn advance(&mut self, device: &str, sequence: u64) {
        let current = self.0.entry(device.to_string()).or_insert(0);
        *current = (*current).max(sequence);
    }
}

/// Stage of the current sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Preparing,
    Uploading,
    Downloading,
    Reconciling,
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Preparing => "preparing",
            SyncState::Uploading => "uploading",
            SyncState::Downloading => "downloading",
            SyncState::Reconciling => "reconciling",
            SyncState::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one successful sync cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    /// Change records published
    pub uploaded: usize,
    /// Remote changes applied locally
    pub downloaded: usize,
    /// Conflicts detected and resolved
    pub conflicts: usize,
    pub duration: Duration,
}

/// Progress notifications delivered to the engine's event handler
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StateChanged(SyncState),
    ItemUploaded {
        item_id: String,
        version: u64,
    },
    ItemFailed {
        queue_id: Uuid,
        error: String,
    },
    ChangeApplied {
        item_id: String,
        version: u64,
        origin: String,
    },
    ConflictResolved {
        record: ConflictRecord,
        remote_won: bool,
    },
    Completed(SyncResult),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_only_moves_forward() {
        let mut watermark = Watermark::new();
        assert_eq!(watermark.get("device-b"), 0);

        watermark.advance("device-b", 5);
        watermark.advance("device-b", 3);
        assert_eq!(watermark.get("device-b"), 5);

        let json = serde_json::to_string(&watermark).unwrap();
        assert_eq!(json, r#"{"device-b":5}"#);
    }

    #[test]
    fn test_remote_change_omits_local_bookkeeping() {
        let change = RemoteChange {
            entry: ChangeLogEntry::new("item-1", OperationType::Create, 1, Utc::now(), "dev-a"),
            item: SyncItem {
                id: "item-1".to_string(),
                version: 1,
                updated_at: Utc::now(),
                deleted: false,
                content_digest: None,
                data: serde_json::json!({"title": "Notes"}),
                pushed_version: 1,
                synced_entry: Some(Uuid::new_v4()),
            },
            base: None,
        };

        let json = serde_json::to_value(&change).unwrap();
        assert!(json["item"].get("pushed_version").is_none());
        assert!(json["item"].get("synced_entry").is_none());
        assert!(json.get("base").is_none());
        assert_eq!(json["entry"]["operation"], "create");

        let parsed: RemoteChange = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.item.pushed_version, 0);
        assert_eq!(parsed.item.synced_entry, None);
        assert_eq!(parsed.entry, change.entry);
    }
}
