//! MemoNexus Sync Engine
//!
//! Offline-first synchronization of a local knowledge base against
//! S3-compatible storage.
//!
//! # Modules
//!
//! - `blobs`: Content-addressed blob storage on the local filesystem
//! - `storage`: Object store adapter for AWS S3, Cloudflare R2, and MinIO
//! - `queue`: Durable retry queue for pending sync operations
//! - `sync`: Change log, conflict resolution, and the sync engine
//! - `db`: SQLite pool and schema

pub mod blobs;
pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Result, StorageError, SyncError};
pub use sync::{SyncContext, SyncEngine, SyncResult, SyncState};
