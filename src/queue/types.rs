//! Queue item types and retry schedule

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Attempts before an item becomes terminally failed
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default queue capacity
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

/// Base backoff unit in seconds
pub const BACKOFF_BASE_SECS: i64 = 60;

/// Backoff ceiling: one hour
pub const BACKOFF_MAX_SECS: i64 = 3600;

/// Backoff after the `retry_count`-th failure: `min(2^n * 60, 3600)` seconds
pub fn backoff_secs(retry_count: u32) -> i64 {
    // 2^6 * 60 already exceeds the ceiling
    if retry_count >= 6 {
        return BACKOFF_MAX_SECS;
    }
    ((1i64 << retry_count) * BACKOFF_BASE_SECS).min(BACKOFF_MAX_SECS)
}

/// Opaque key-value payload attached to a queue item
pub type Payload = BTreeMap<String, String>;

// ============================================================================
// Operation & Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    Upload,
    Download,
    Delete,
}

impl QueueOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOperation::Upload => "upload",
            QueueOperation::Download => "download",
            QueueOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(QueueOperation::Upload),
            "download" => Ok(QueueOperation::Download),
            "delete" => Ok(QueueOperation::Delete),
            other => Err(format!("unknown queue operation: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Failed,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::InProgress => "in_progress",
            QueueStatus::Failed => "failed",
            QueueStatus::Completed => "completed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "in_progress" => Ok(QueueStatus::InProgress),
            "failed" => Ok(QueueStatus::Failed),
            "completed" => Ok(QueueStatus::Completed),
            other => Err(format!("unknown queue status: {}", other)),
        }
    }
}

// ============================================================================
// Queue Item
// ============================================================================

/// A pending sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub operation: QueueOperation,
    pub payload: Payload,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Epoch seconds at which the item becomes eligible again
    pub next_retry_at: i64,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(operation: QueueOperation, payload: Payload, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            operation,
            payload,
            retry_count: 0,
            max_retries,
            next_retry_at: now.timestamp(),
            status: QueueStatus::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    /// Pending and past its scheduled time
    pub fn is_ready(&self, now: i64) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at <= now
    }

    pub fn payload_value(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Record a failed attempt and schedule the next one
    pub(crate) fn record_failure(&mut self, error: &str, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = QueueStatus::Failed;
        } else {
            self.status = QueueStatus::Pending;
            self.next_retry_at = now.timestamp() + backoff_secs(self.retry_count);
        }
    }

    /// Put the item back in the ready set with a clean retry budget
    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = now.timestamp();
        self.updated_at = now;
    }
}

/// Build a payload from key/value pairs
pub fn payload<const N: usize>(pairs: [(&str, &str); N]) -> Payload {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub total: usize,
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_secs(1), 120);
        assert_eq!(backoff_secs(2), 240);
        assert_eq!(backoff_secs(5), 1920);
        assert_eq!(backoff_secs(6), 3600);
        assert_eq!(backoff_secs(40), 3600);
    }

    #[test]
    fn test_retry_count_never_exceeds_max() {
        for max_retries in 1..6 {
            let mut item = QueueItem::new(QueueOperation::Upload, Payload::new(), max_retries);
            while item.status != QueueStatus::Failed {
                assert!(item.retry_count < item.max_retries);
                item.record_failure("boom", Utc::now());
            }
            assert_eq!(item.retry_count, max_retries);
        }
    }

    #[test]
    fn test_failure_schedules_backoff() {
        let mut item = QueueItem::new(QueueOperation::Upload, Payload::new(), 3);
        let now = Utc::now();
        item.record_failure("timeout", now);

        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.next_retry_at, now.timestamp() + 120);
        assert_eq!(item.last_error.as_deref(), Some("timeout"));
        assert!(!item.is_ready(now.timestamp()));
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::InProgress,
            QueueStatus::Failed,
            QueueStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<QueueOperation>().is_err());
    }
}
