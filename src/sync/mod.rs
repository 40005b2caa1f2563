//! Sync module for multi-device synchronization
//!
//! Provides:
//! - Version-based change tracking
//! - Conflict detection and Last-Write-Wins resolution
//! - Push/pull sync cycles against an object store
//!
//! # Sync Protocol
//!
//! 1. Local mutations are recorded in the change log and queued
//! 2. The engine publishes each queued item's blob and change record
//! 3. Change records from other devices are pulled after the watermark
//! 4. Each pulled change fast-forwards the item or goes through the resolver
//! 5. The watermark advances once the whole batch is applied
//!
//! # Conflict Resolution
//!
//! - Later `updated_at` wins, for updates and deletes alike
//! - Ties go to the greater `(item_id, entry id)`
//! - Every conflict leaves a `ConflictRecord`, whichever side won

mod changelog;
mod conflict;
mod credentials;
mod engine;
mod repository;
mod store;
mod types;

pub use changelog::ChangeLog;
pub use conflict::{conflict_id, ConflictResolver, ConflictWinner, ResolvedConflict};
pub use credentials::{
    CredentialSource, ObjectStoreConnector, S3Connector, StaticCredentials, SyncCredential,
};
pub use engine::{EventHandler, SyncContext, SyncEngine};
pub use repository::Repository;
pub use store::SqliteRepository;
pub use types::{
    ChangeLogEntry, ConflictRecord, OperationType, RemoteChange, Resolution, SyncEvent, SyncItem,
    SyncResult, SyncState, Watermark,
};
