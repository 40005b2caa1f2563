//! Offline-aware retry queue for sync operations
//!
//! Items move `pending -> in_progress -> (removed | pending with backoff | failed)`.
//! A failed item stays until `retry_all` or an explicit remove.

mod store;
mod sync_queue;
mod types;

pub use store::QueueRepository;
pub use sync_queue::SyncQueue;
pub use types::*;
