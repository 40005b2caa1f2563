//! Append-only change log with version validation

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};

use super::repository::Repository;
use super::types::{ChangeLogEntry, OperationType};

/// Validates and records item mutations
#[derive(Clone)]
pub struct ChangeLog {
    repo: Arc<dyn Repository>,
    device_id: String,
}

impl ChangeLog {
    pub fn new(repo: Arc<dyn Repository>, device_id: impl Into<String>) -> Self {
        Self {
            repo,
            device_id: device_id.into(),
        }
    }

    /// Validate and append a local mutation
    pub async fn record_change(
        &self,
        item_id: &str,
        operation: OperationType,
        version: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<ChangeLogEntry> {
        self.validate_local(item_id, operation, version).await?;

        let entry = ChangeLogEntry::new(item_id, operation, version, timestamp, &self.device_id);
        self.repo.append_change(&entry).await?;

        tracing::debug!(
            item_id = %item_id,
            operation = %operation,
            version = version,
            "Recorded change"
        );

        Ok(entry)
    }

    /// Check a local mutation against the item's history.
    ///
    /// Creates start at version 1 on an item with no history, updates must be
    /// exactly one ahead, and deletes must move the version forward.
    pub async fn validate_local(
        &self,
        item_id: &str,
        operation: OperationType,
        version: u64,
    ) -> Result<()> {
        let last = self.repo.last_version(item_id).await?;

        let (valid, expected) = match operation {
            OperationType::Create => (last == 0 && version == 1, 1),
            OperationType::Update => (last > 0 && version == last + 1, last + 1),
            OperationType::Delete => (last > 0 && version > last, last + 1),
        };

        if valid {
            Ok(())
        } else {
            Err(SyncError::InvalidVersion {
                item_id: item_id.to_string(),
                expected,
                actual: version,
            })
        }
    }

    /// Re-validate an entry pulled from another device. Remote history is
    /// only ever published in order, so versions from one origin must
    /// strictly increase.
    pub async fn validate_remote(&self, entry: &ChangeLogEntry) -> Result<()> {
        let invalid = |expected: u64| SyncError::InvalidVersion {
            item_id: entry.item_id.clone(),
            expected,
            actual: entry.version,
        };

        match entry.operation {
            OperationType::Create if entry.version != 1 => return Err(invalid(1)),
            OperationType::Update | OperationType::Delete if entry.version < 2 => {
                return Err(invalid(2))
            }
            _ => {}
        }

        if let Some(previous) = self
            .repo
            .last_change_from(&entry.item_id, &entry.origin)
            .await?
        {
            if entry.version <= previous.version {
                return Err(invalid(previous.version + 1));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::sync::store::SqliteRepository;

    async fn setup() -> ChangeLog {
        let repo = SqliteRepository::new(create_memory_pool().await.unwrap());
        ChangeLog::new(Arc::new(repo), "dev-a")
    }

    #[tokio::test]
    async fn test_local_versions_must_be_sequential() {
        let log = setup().await;

        log.record_change("a", OperationType::Create, 1, Utc::now())
            .await
            .unwrap();
        log.record_change("a", OperationType::Update, 2, Utc::now())
            .await
            .unwrap();

        let skipped = log
            .record_change("a", OperationType::Update, 4, Utc::now())
            .await;
        assert!(matches!(
            skipped,
            Err(SyncError::InvalidVersion {
                expected: 3,
                actual: 4,
                ..
            })
        ));

        let repeated = log
            .record_change("a", OperationType::Update, 2, Utc::now())
            .await;
        assert!(repeated.is_err());

        log.record_change("a", OperationType::Delete, 3, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_requires_fresh_item() {
        let log = setup().await;

        assert!(log
            .record_change("a", OperationType::Create, 2, Utc::now())
            .await
            .is_err());
        assert!(log
            .record_change("a", OperationType::Update, 1, Utc::now())
            .await
            .is_err());

        log.record_change("a", OperationType::Create, 1, Utc::now())
            .await
            .unwrap();
        assert!(log
            .record_change("a", OperationType::Create, 1, Utc::now())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_remote_validation() {
        let log = setup().await;

        let bad_create = ChangeLogEntry::new("x", OperationType::Create, 3, Utc::now(), "dev-b");
        assert!(log.validate_remote(&bad_create).await.is_err());

        let bad_update = ChangeLogEntry::new("x", OperationType::Update, 1, Utc::now(), "dev-b");
        assert!(log.validate_remote(&bad_update).await.is_err());

        let update = ChangeLogEntry::new("x", OperationType::Update, 4, Utc::now(), "dev-b");
        log.validate_remote(&update).await.unwrap();
        log.repo.append_change(&update).await.unwrap();

        let stale = ChangeLogEntry::new("x", OperationType::Update, 4, Utc::now(), "dev-b");
        assert!(log.validate_remote(&stale).await.is_err());

        // Another device's history is independent
        let other = ChangeLogEntry::new("x", OperationType::Update, 2, Utc::now(), "dev-c");
        log.validate_remote(&other).await.unwrap();
    }
}
