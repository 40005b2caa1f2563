//! Conflict detection and resolution
//!
//! Concurrent edits from multiple devices are settled by Last-Write-Wins on
//! the item's `updated_at`. Equal timestamps fall back to comparing
//! `(item_id, entry id)` so every device picks the same winner.

use chrono::Utc;
use uuid::Uuid;

use super::types::{ChangeLogEntry, ConflictRecord, RemoteChange, Resolution, SyncItem};

/// Which side won the conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictWinner {
    Local,
    Remote,
}

/// Result of conflict resolution
#[derive(Debug, Clone)]
pub struct ResolvedConflict {
    pub winner: ConflictWinner,
    pub record: ConflictRecord,
}

/// Last-Write-Wins conflict resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        Self
    }

    /// Whether both sides mutated the item since the last change they share.
    ///
    /// A remote change fast-forwards only when it was made on top of exactly
    /// the change this device last published or applied, and nothing local is
    /// waiting to be published. Version numbers alone cannot tell, since a
    /// device publishes only the latest of several offline edits.
    pub fn detect_conflict(&self, local: &SyncItem, remote: &RemoteChange) -> bool {
        local.has_unpushed_changes() || remote.base != local.synced_entry
    }

    /// Pick the winner and build the audit record.
    ///
    /// `local_entry` is the entry that produced the current local state, if
    /// the item has any history.
    pub fn resolve(
        &self,
        local: &SyncItem,
        local_entry: Option<&ChangeLogEntry>,
        remote: &RemoteChange,
    ) -> ResolvedConflict {
        let local_key = (
            local.updated_at,
            local.id.as_str(),
            local_entry.map(|e| e.id).unwrap_or_else(Uuid::nil),
        );
        let remote_key = (
            remote.item.updated_at,
            remote.entry.item_id.as_str(),
            remote.entry.id,
        );

        let winner = if remote_key > local_key {
            ConflictWinner::Remote
        } else {
            ConflictWinner::Local
        };

        ResolvedConflict {
            winner,
            record: ConflictRecord {
                id: conflict_id(&remote.entry.item_id, remote.entry.id),
                item_id: remote.entry.item_id.clone(),
                local_timestamp: local.updated_at,
                remote_timestamp: remote.item.updated_at,
                resolution: Resolution::LastWriteWins,
                detected_at: Utc::now(),
            },
        }
    }
}

/// Deterministic id for the conflict raised by one remote entry, so
/// re-resolving after a crash never duplicates audit rows
pub fn conflict_id(item_id: &str, remote_entry: Uuid) -> Uuid {
    let name = format!("{}:{}", item_id, remote_entry);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::OperationType;
    use chrono::{DateTime, Duration, Utc};

    fn item(version: u64, pushed_version: u64, updated_at: DateTime<Utc>) -> SyncItem {
        SyncItem {
            id: "item-1".to_string(),
            version,
            updated_at,
            deleted: false,
            content_digest: None,
            data: serde_json::Value::Null,
            pushed_version,
            synced_entry: None,
        }
    }

    fn remote(
        operation: OperationType,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> RemoteChange {
        let entry = ChangeLogEntry::new("item-1", operation, version, updated_at, "dev-b");
        RemoteChange {
            entry,
            item: SyncItem {
                deleted: operation == OperationType::Delete,
                ..item(version, 0, updated_at)
            },
            base: None,
        }
    }

    fn based_on(base: Uuid, change: RemoteChange) -> RemoteChange {
        RemoteChange {
            base: Some(base),
            ..change
        }
    }

    #[test]
    fn test_fast_forward_is_not_a_conflict() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let shared = Uuid::new_v4();

        let local = SyncItem {
            synced_entry: Some(shared),
            ..item(2, 2, now)
        };
        let next = based_on(shared, remote(OperationType::Update, 3, now));
        assert!(!resolver.detect_conflict(&local, &next));

        // Version gaps are fine as long as the base matches
        let gap = based_on(shared, remote(OperationType::Update, 5, now));
        assert!(!resolver.detect_conflict(&local, &gap));
    }

    #[test]
    fn test_concurrent_edits_conflict() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let shared = Uuid::new_v4();

        // Local already published its own edit on top of the shared change
        let local = SyncItem {
            synced_entry: Some(Uuid::new_v4()),
            ..item(2, 2, now)
        };
        let concurrent = based_on(shared, remote(OperationType::Update, 3, now));
        assert!(resolver.detect_conflict(&local, &concurrent));

        // Local edit not yet published
        let local = SyncItem {
            synced_entry: Some(shared),
            ..item(2, 1, now)
        };
        assert!(resolver.detect_conflict(&local, &concurrent));

        // Independent creates of the same id
        assert!(resolver.detect_conflict(&item(1, 0, now), &remote(OperationType::Create, 1, now)));
    }

    #[test]
    fn test_later_write_wins() {
        let resolver = ConflictResolver::new();
        let earlier = Utc::now();
        let later = earlier + Duration::seconds(5);

        let resolved = resolver.resolve(
            &item(2, 2, earlier),
            None,
            &remote(OperationType::Update, 2, later),
        );
        assert_eq!(resolved.winner, ConflictWinner::Remote);
        assert_eq!(resolved.record.resolution, Resolution::LastWriteWins);
        assert_eq!(resolved.record.local_timestamp, earlier);
        assert_eq!(resolved.record.remote_timestamp, later);

        let resolved = resolver.resolve(
            &item(2, 2, later),
            None,
            &remote(OperationType::Update, 2, earlier),
        );
        assert_eq!(resolved.winner, ConflictWinner::Local);
    }

    #[test]
    fn test_older_delete_loses_to_newer_update() {
        let resolver = ConflictResolver::new();
        let earlier = Utc::now();
        let later = earlier + Duration::seconds(1);

        let resolved = resolver.resolve(
            &item(3, 3, later),
            None,
            &remote(OperationType::Delete, 3, earlier),
        );
        assert_eq!(resolved.winner, ConflictWinner::Local);
    }

    #[test]
    fn test_tie_break_is_symmetric() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();

        let a = remote(OperationType::Update, 2, now);
        let b = remote(OperationType::Update, 2, now);

        // Device A holds `a` locally and pulls `b`; device B the reverse
        let on_a = resolver.resolve(&a.item, Some(&a.entry), &b);
        let on_b = resolver.resolve(&b.item, Some(&b.entry), &a);

        let a_wins_on_a = on_a.winner == ConflictWinner::Local;
        let a_wins_on_b = on_b.winner == ConflictWinner::Remote;
        assert_eq!(a_wins_on_a, a_wins_on_b);
    }

    #[test]
    fn test_conflict_id_is_deterministic() {
        let entry = Uuid::new_v4();
        assert_eq!(conflict_id("item-1", entry), conflict_id("item-1", entry));
        assert_ne!(conflict_id("item-1", entry), conflict_id("item-2", entry));
    }
}
