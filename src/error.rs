//! Error types for the MemoNexus sync engine

use thiserror::Error;

/// Engine-wide result type
pub type Result<T> = std::result::Result<T, SyncError>;

/// Engine error type
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync queue is full (max: {max})")]
    Capacity { max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Blob corrupted: expected {expected}, got {actual}")]
    Corrupted { expected: String, actual: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Storage quota exceeded: {0}")]
    Quota(String),

    #[error("Invalid version for {item_id}: expected {expected}, got {actual}")]
    InvalidVersion {
        item_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("A sync cycle is already running")]
    AlreadyRunning,

    #[error("S3 error: {0}")]
    Storage(StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the failed operation may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Storage(e) => e.kind().is_retryable(),
            _ => false,
        }
    }

    /// Errors that stop a sync cycle immediately instead of being absorbed
    /// into per-item backoff
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::Quota(_) | SyncError::Capacity { .. }
        )
    }

    /// Failures that no amount of retrying fixes; the affected item is dropped
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Corrupted { .. }
                | SyncError::NotFound(_)
                | SyncError::InvalidVersion { .. }
                | SyncError::Serialization(_)
        )
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err.kind() {
            ErrorKind::Auth => SyncError::Auth(err.to_string()),
            ErrorKind::Quota => SyncError::Quota(err.to_string()),
            ErrorKind::NotFound => SyncError::NotFound(err.to_string()),
            ErrorKind::Timeout | ErrorKind::Connection => SyncError::Network(err.to_string()),
            ErrorKind::Failure => SyncError::Storage(err),
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("S3 request timed out: {0}")]
    Timeout(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),
}

/// Coarse classification of a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connection,
    Auth,
    Quota,
    NotFound,
    Failure,
}

impl ErrorKind {
    /// Timeouts and dropped connections are worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Failure)
    }
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::ConnectionFailed(_) => ErrorKind::Connection,
            StorageError::Timeout(_) => ErrorKind::Timeout,
            StorageError::AccessDenied(_) => ErrorKind::Auth,
            StorageError::QuotaExceeded(_) => ErrorKind::Quota,
            StorageError::ObjectNotFound(_) | StorageError::BucketNotFound(_) => {
                ErrorKind::NotFound
            }
            StorageError::SdkError(_) => ErrorKind::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        let err: SyncError = StorageError::AccessDenied("bad key".into()).into();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(err.is_terminal());
        assert!(!err.is_retryable());

        let err: SyncError = StorageError::Timeout("put".into()).into();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.is_retryable());

        let err: SyncError = StorageError::QuotaExceeded("full".into()).into();
        assert!(matches!(err, SyncError::Quota(_)));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_generic_failures_stay_retryable() {
        let err: SyncError = StorageError::SdkError("500 InternalError".into()).into();
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_corruption_is_neither_retryable_nor_terminal() {
        let err = SyncError::Corrupted {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
        assert!(err.is_permanent());
    }
}
