//! Sync Queue
//!
//! Manages pending sync operations with:
//! - A single mutex over items and the online flag
//! - Readiness wakeups for blocked dequeuers
//! - Write-through persistence to SQLite
//!
//! No lock is ever held across an await point, and callers perform network
//! I/O between `dequeue` and `complete`/`failed`, outside the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{Result, SyncError};

use super::store::QueueRepository;
use super::types::{
    Payload, QueueItem, QueueOperation, QueueStats, QueueStatus, DEFAULT_MAX_RETRIES,
};

/// Shortest sleep while waiting for a scheduled retry
const MIN_WAIT: Duration = Duration::from_millis(10);

// ============================================================================
// Sync Queue
// ============================================================================

/// Durable queue of pending upload/download/delete operations
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<SyncQueueInner>,
}

struct SyncQueueInner {
    state: Mutex<QueueState>,

    /// Signalled whenever an item may have become ready
    ready: Notify,

    /// Serializes mutations with their persistence writes
    persist: tokio::sync::Mutex<()>,

    store: Option<QueueRepository>,

    max_size: usize,

    max_retries: u32,
}

struct QueueState {
    items: HashMap<Uuid, QueueItem>,
    online: bool,
}

impl QueueState {
    /// Make every backed-off pending item due at `now`
    fn flush_backoff(&mut self, now: DateTime<Utc>) -> Vec<QueueItem> {
        self.items
            .values_mut()
            .filter(|item| {
                item.status == QueueStatus::Pending && item.next_retry_at > now.timestamp()
            })
            .map(|item| {
                item.next_retry_at = now.timestamp();
                item.updated_at = now;
                item.clone()
            })
            .collect()
    }
}

impl SyncQueue {
    /// Create an in-memory queue
    pub fn new(max_size: usize) -> Self {
        Self::build(max_size, DEFAULT_MAX_RETRIES, None, HashMap::new())
    }

    /// Create an in-memory queue from configuration
    pub fn with_config(config: &QueueConfig) -> Self {
        Self::build(config.max_size, config.max_retries, None, HashMap::new())
    }

    /// Open a persistent queue, restoring items saved by a previous run.
    ///
    /// Items left `in_progress` by a crash go back to `pending`.
    pub async fn open(config: &QueueConfig, pool: SqlitePool) -> Result<Self> {
        let store = QueueRepository::new(pool);
        let mut items = HashMap::new();
        let mut recovered = 0;

        for mut item in store.load_all().await? {
            if item.status == QueueStatus::InProgress {
                item.status = QueueStatus::Pending;
                item.updated_at = Utc::now();
                store.upsert(&item).await?;
                recovered += 1;
            }
            items.insert(item.id, item);
        }

        tracing::info!(
            items = items.len(),
            recovered = recovered,
            "Restored sync queue"
        );

        Ok(Self::build(
            config.max_size,
            config.max_retries,
            Some(store),
            items,
        ))
    }

    fn build(
        max_size: usize,
        max_retries: u32,
        store: Option<QueueRepository>,
        items: HashMap<Uuid, QueueItem>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncQueueInner {
                state: Mutex::new(QueueState {
                    items,
                    online: true,
                }),
                ready: Notify::new(),
                persist: tokio::sync::Mutex::new(()),
                store,
                max_size,
                max_retries,
            }),
        }
    }

    // ========================================================================
    // Producer / Consumer
    // ========================================================================

    /// Add a new pending operation
    pub async fn enqueue(&self, operation: QueueOperation, payload: Payload) -> Result<QueueItem> {
        let _guard = self.inner.persist.lock().await;

        let item = {
            let mut state = self.inner.state.lock();
            if state.items.len() >= self.inner.max_size {
                return Err(SyncError::Capacity {
                    max: self.inner.max_size,
                });
            }
            let item = QueueItem::new(operation, payload, self.inner.max_retries);
            state.items.insert(item.id, item.clone());
            item
        };

        if let Err(e) = self.write(&item).await {
            self.inner.state.lock().items.remove(&item.id);
            return Err(e);
        }
        self.inner.ready.notify_waiters();

        tracing::debug!(
            id = %item.id,
            operation = %item.operation,
            "Enqueued sync operation"
        );

        Ok(item)
    }

    /// Take any ready item and mark it in progress. Returns `None` when
    /// offline or when nothing is due.
    pub async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let _guard = self.inner.persist.lock().await;

        let (item, previous) = {
            let mut state = self.inner.state.lock();
            if !state.online {
                return Ok(None);
            }
            let now = Utc::now();
            let ready_id = state
                .items
                .values()
                .filter(|item| item.is_ready(now.timestamp()))
                .min_by_key(|item| item.created_at)
                .map(|item| item.id);

            match ready_id.and_then(|id| state.items.get_mut(&id)) {
                Some(item) => {
                    let previous = (item.status, item.updated_at);
                    item.status = QueueStatus::InProgress;
                    item.updated_at = now;
                    (item.clone(), previous)
                }
                None => return Ok(None),
            }
        };

        if let Err(e) = self.write(&item).await {
            if let Some(stored) = self.inner.state.lock().items.get_mut(&item.id) {
                (stored.status, stored.updated_at) = previous;
            }
            return Err(e);
        }
        Ok(Some(item))
    }

    /// Like [`dequeue`](Self::dequeue), but waits up to `timeout` for an item
    /// to become ready. Wakes on new items, on reconnect, and when the
    /// earliest scheduled retry comes due.
    pub async fn dequeue_blocking(&self, timeout: Duration) -> Result<Option<QueueItem>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.inner.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.dequeue().await? {
                return Ok(Some(item));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let mut wait = deadline - now;
            if let Some(until_ready) = self.time_until_next_ready() {
                wait = wait.min(until_ready.max(MIN_WAIT));
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Terminal success: the item leaves the queue
    pub async fn complete(&self, id: Uuid) -> Result<()> {
        let _guard = self.inner.persist.lock().await;

        let removed = self.inner.state.lock().items.remove(&id);
        if removed.is_none() {
            return Err(SyncError::NotFound(format!("queue item {}", id)));
        }

        self.erase(id).await?;
        tracing::debug!(id = %id, "Completed sync operation");
        Ok(())
    }

    /// Record a failed attempt. The item is rescheduled with exponential
    /// backoff, or becomes `failed` once its retries are used up.
    pub async fn failed(&self, id: Uuid, error: &str) -> Result<QueueItem> {
        let _guard = self.inner.persist.lock().await;

        let item = {
            let mut state = self.inner.state.lock();
            let item = state
                .items
                .get_mut(&id)
                .ok_or_else(|| SyncError::NotFound(format!("queue item {}", id)))?;
            if item.status != QueueStatus::Failed {
                item.record_failure(error, Utc::now());
            }
            item.clone()
        };

        self.write(&item).await?;
        self.inner.ready.notify_waiters();

        if item.status == QueueStatus::Failed {
            tracing::warn!(
                id = %id,
                operation = %item.operation,
                retries = item.retry_count,
                error = %error,
                "Sync operation failed permanently"
            );
        } else {
            tracing::debug!(
                id = %id,
                retry_count = item.retry_count,
                next_retry_at = item.next_retry_at,
                "Sync operation rescheduled"
            );
        }

        Ok(item)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Snapshot of a single item
    pub fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.inner.state.lock().items.get(&id).cloned()
    }

    pub fn get_status(&self, id: Uuid) -> Option<QueueStatus> {
        self.inner.state.lock().items.get(&id).map(|item| item.status)
    }

    /// Pending items, oldest first
    pub fn get_pending(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self
            .inner
            .state
            .lock()
            .items
            .values()
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    /// All items, oldest first
    pub fn list(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.inner.state.lock().items.values().cloned().collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    pub fn size(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let mut stats = QueueStats {
            total: state.items.len(),
            online: state.online,
            ..Default::default()
        };
        for item in state.items.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::InProgress => stats.in_progress += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Completed => {}
            }
        }
        stats
    }

    /// First pending item of `operation` whose payload `item_id` matches
    pub fn find_pending(&self, item_id: &str, operation: QueueOperation) -> Option<QueueItem> {
        self.inner
            .state
            .lock()
            .items
            .values()
            .find(|item| {
                item.status == QueueStatus::Pending
                    && item.operation == operation
                    && item.payload_value("item_id") == Some(item_id)
            })
            .cloned()
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Drop every item
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.inner.persist.lock().await;

        let count = {
            let mut state = self.inner.state.lock();
            let count = state.items.len();
            state.items.clear();
            count
        };

        if let Some(store) = &self.inner.store {
            store.delete_all().await?;
        }

        tracing::info!(count = count, "Cleared sync queue");
        Ok(count)
    }

    /// Remove one item regardless of status. Returns whether it existed.
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let _guard = self.inner.persist.lock().await;

        let removed = self.inner.state.lock().items.remove(&id).is_some();
        if removed {
            self.erase(id).await?;
        }
        Ok(removed)
    }

    /// Remove pending uploads and deletes for `item_id`
    pub async fn remove_pending_for(&self, item_id: &str) -> Result<usize> {
        let _guard = self.inner.persist.lock().await;

        let ids: Vec<Uuid> = {
            let mut state = self.inner.state.lock();
            let ids: Vec<Uuid> = state
                .items
                .values()
                .filter(|item| {
                    item.status == QueueStatus::Pending
                        && item.operation != QueueOperation::Download
                        && item.payload_value("item_id") == Some(item_id)
                })
                .map(|item| item.id)
                .collect();
            for id in &ids {
                state.items.remove(id);
            }
            ids
        };

        for id in &ids {
            self.erase(*id).await?;
        }
        Ok(ids.len())
    }

    /// Reset every failed item to pending with a fresh retry budget
    pub async fn retry_all(&self) -> Result<usize> {
        let _guard = self.inner.persist.lock().await;

        let reset: Vec<QueueItem> = {
            let mut state = self.inner.state.lock();
            let now = Utc::now();
            state
                .items
                .values_mut()
                .filter(|item| item.status == QueueStatus::Failed)
                .map(|item| {
                    item.reset(now);
                    item.clone()
                })
                .collect()
        };

        for item in &reset {
            self.write(item).await?;
        }
        if !reset.is_empty() {
            self.inner.ready.notify_waiters();
        }

        tracing::info!(count = reset.len(), "Retrying failed sync operations");
        Ok(reset.len())
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Flip connectivity. Coming back online also flushes backoff, so every
    /// pending item is dequeue-ready immediately after the transition.
    pub async fn set_online_status(&self, online: bool) -> Result<()> {
        let _guard = self.inner.persist.lock().await;

        let (was_online, rescheduled) = {
            let mut state = self.inner.state.lock();
            let was_online = std::mem::replace(&mut state.online, online);
            let rescheduled = if online && !was_online {
                state.flush_backoff(Utc::now())
            } else {
                Vec::new()
            };
            (was_online, rescheduled)
        };

        if online && !was_online {
            tracing::info!(rescheduled = rescheduled.len(), "Sync queue back online");
            self.inner.ready.notify_waiters();
        } else if !online && was_online {
            tracing::info!("Sync queue offline");
        }

        for item in &rescheduled {
            self.write(item).await?;
        }
        Ok(())
    }

    pub fn is_online(&self) -> bool {
        self.inner.state.lock().online
    }

    /// Make every backed-off pending item ready now, so a reconnect flushes
    /// the backlog instead of waiting out stale backoff windows
    pub async fn process_on_reconnect(&self) -> Result<usize> {
        let _guard = self.inner.persist.lock().await;

        let rescheduled = self.inner.state.lock().flush_backoff(Utc::now());

        for item in &rescheduled {
            self.write(item).await?;
        }
        if !rescheduled.is_empty() {
            self.inner.ready.notify_waiters();
        }

        tracing::debug!(count = rescheduled.len(), "Flushed backoff after reconnect");
        Ok(rescheduled.len())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Time until the earliest pending item comes due, if any
    fn time_until_next_ready(&self) -> Option<Duration> {
        let state = self.inner.state.lock();
        if !state.online {
            return None;
        }
        let next = state
            .items
            .values()
            .filter(|item| item.status == QueueStatus::Pending)
            .map(|item| item.next_retry_at)
            .min()?;
        let millis = next * 1000 - Utc::now().timestamp_millis();
        Some(Duration::from_millis(millis.max(0) as u64))
    }

    async fn write(&self, item: &QueueItem) -> Result<()> {
        if let Some(store) = &self.inner.store {
            store.upsert(item).await?;
        }
        Ok(())
    }

    async fn erase(&self, id: Uuid) -> Result<()> {
        if let Some(store) = &self.inner.store {
            store.delete(id).await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::queue::types::payload;

    fn config(max_size: usize) -> QueueConfig {
        QueueConfig {
            max_size,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    #[tokio::test]
    async fn test_enqueue_defaults() {
        let queue = SyncQueue::new(10);
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        assert_eq!(item.retry_count, 0);
        assert_eq!(item.max_retries, 3);
        assert_eq!(item.status, QueueStatus::Pending);
        assert!(item.next_retry_at <= Utc::now().timestamp());
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test]
    async fn test_capacity() {
        let queue = SyncQueue::new(1);

        let first = queue
            .enqueue(QueueOperation::Upload, payload([("item", "A")]))
            .await
            .unwrap();
        let second = queue
            .enqueue(QueueOperation::Upload, payload([("item", "B")]))
            .await;
        assert!(matches!(second, Err(SyncError::Capacity { max: 1 })));

        queue.complete(first.id).await.unwrap();
        queue
            .enqueue(QueueOperation::Upload, payload([("item", "B")]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_marks_in_progress() {
        let queue = SyncQueue::new(10);
        let item = queue
            .enqueue(QueueOperation::Download, payload([("digest", "ab")]))
            .await
            .unwrap();

        let taken = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(taken.id, item.id);
        assert_eq!(taken.status, QueueStatus::InProgress);
        assert_eq!(queue.get_status(item.id), Some(QueueStatus::InProgress));

        // In-progress items are not handed out twice
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_backs_off_then_terminates() {
        let queue = SyncQueue::new(10);
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        let before = Utc::now().timestamp();
        let after_first = queue.failed(item.id, "timeout").await.unwrap();
        assert_eq!(after_first.status, QueueStatus::Pending);
        assert_eq!(after_first.retry_count, 1);
        assert!(after_first.next_retry_at >= before + 120);
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.failed(item.id, "timeout").await.unwrap();
        let terminal = queue.failed(item.id, "timeout").await.unwrap();
        assert_eq!(terminal.status, QueueStatus::Failed);
        assert_eq!(terminal.retry_count, 3);

        // Further failures do not push retry_count past the limit
        let again = queue.failed(item.id, "timeout").await.unwrap();
        assert_eq!(again.retry_count, 3);
        assert_eq!(queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_retry_all_resets_failed() {
        let queue = SyncQueue::with_config(&QueueConfig {
            max_size: 10,
            max_retries: 1,
        });
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();
        queue.failed(item.id, "denied").await.unwrap();
        assert_eq!(queue.get_status(item.id), Some(QueueStatus::Failed));

        assert_eq!(queue.retry_all().await.unwrap(), 1);
        let reset = queue.get(item.id).unwrap();
        assert_eq!(reset.status, QueueStatus::Pending);
        assert_eq!(reset.retry_count, 0);
        assert!(queue.dequeue().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reconnect_flushes_backoff() {
        let queue = SyncQueue::new(10);
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();
        queue.failed(item.id, "connection refused").await.unwrap();

        queue.set_online_status(false).await.unwrap();
        assert!(!queue.is_online());
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.set_online_status(true).await.unwrap();

        let ready = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(ready.id, item.id);
        assert_eq!(ready.retry_count, 1);
    }

    #[tokio::test]
    async fn test_process_on_reconnect_flushes_backoff() {
        let queue = SyncQueue::new(10);
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();
        queue.failed(item.id, "timeout").await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());

        assert_eq!(queue.process_on_reconnect().await.unwrap(), 1);
        assert_eq!(queue.process_on_reconnect().await.unwrap(), 0);
        assert_eq!(queue.dequeue().await.unwrap().unwrap().id, item.id);
    }

    #[tokio::test]
    async fn test_offline_blocks_dequeue() {
        let queue = SyncQueue::new(10);
        queue.set_online_status(false).await.unwrap();
        queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        assert!(queue.dequeue().await.unwrap().is_none());
        assert!(queue
            .dequeue_blocking(Duration::from_millis(50))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = SyncQueue::new(10);

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_blocking(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        let taken = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(taken.id, item.id);
    }

    #[tokio::test]
    async fn test_blocking_dequeue_wakes_on_reconnect() {
        let queue = SyncQueue::new(10);
        queue.set_online_status(false).await.unwrap();
        queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_blocking(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.set_online_status(true).await.unwrap();

        assert!(consumer.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blocking_dequeue_times_out() {
        let queue = SyncQueue::new(10);
        let started = std::time::Instant::now();

        let result = queue
            .dequeue_blocking(Duration::from_millis(100))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_concurrent_workers_take_distinct_items() {
        let queue = SyncQueue::new(100);
        for i in 0..20 {
            queue
                .enqueue(QueueOperation::Upload, payload([("item_id", &i.to_string())]))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = queue.dequeue().await.unwrap() {
                    taken.push(item.id);
                    queue.complete(item.id).await.unwrap();
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn test_remove_clear_and_pending_lookup() {
        let queue = SyncQueue::new(10);
        let a = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();
        queue
            .enqueue(QueueOperation::Delete, payload([("item_id", "A")]))
            .await
            .unwrap();
        queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "B")]))
            .await
            .unwrap();

        assert_eq!(
            queue.find_pending("A", QueueOperation::Upload).map(|i| i.id),
            Some(a.id)
        );
        assert_eq!(queue.get_pending().len(), 3);

        assert_eq!(queue.remove_pending_for("A").await.unwrap(), 2);
        assert!(queue.remove(a.id).await.is_ok_and(|removed| !removed));
        assert_eq!(queue.list().len(), 1);

        assert_eq!(queue.clear().await.unwrap(), 1);
        assert_eq!(queue.size(), 0);
        assert!(matches!(
            queue.complete(a.id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_survives_restart() {
        let pool = create_memory_pool().await.unwrap();

        let queue = SyncQueue::open(&config(10), pool.clone()).await.unwrap();
        let a = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();
        let b = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "B")]))
            .await
            .unwrap();
        let done = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "C")]))
            .await
            .unwrap();
        queue.complete(done.id).await.unwrap();

        queue.failed(b.id, "timeout").await.unwrap();

        // Simulate a crash while `a` is in flight
        let taken = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(taken.id, a.id);
        drop(queue);

        let restored = SyncQueue::open(&config(10), pool).await.unwrap();
        assert_eq!(restored.size(), 2);
        assert_eq!(restored.get_status(a.id), Some(QueueStatus::Pending));
        assert!(restored.get(done.id).is_none());

        let backed_off = restored.get(b.id).unwrap();
        assert_eq!(backed_off.retry_count, 1);
        assert_eq!(backed_off.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_reconnect_flush_is_persisted() {
        let pool = create_memory_pool().await.unwrap();
        let queue = SyncQueue::open(&config(10), pool.clone()).await.unwrap();
        let item = queue
            .enqueue(QueueOperation::Download, payload([("digest", "abc")]))
            .await
            .unwrap();
        queue.failed(item.id, "timeout").await.unwrap();

        // Staying online leaves the backoff window alone
        queue.set_online_status(true).await.unwrap();
        assert!(queue.dequeue().await.unwrap().is_none());

        queue.set_online_status(false).await.unwrap();
        queue.set_online_status(true).await.unwrap();
        drop(queue);

        let restored = SyncQueue::open(&config(10), pool).await.unwrap();
        let ready = restored.dequeue().await.unwrap().unwrap();
        assert_eq!(ready.id, item.id);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let pool = create_memory_pool().await.unwrap();
        let queue = SyncQueue::open(&config(10), pool.clone()).await.unwrap();
        let item = queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "A")]))
            .await
            .unwrap();

        pool.close().await;

        assert!(queue.dequeue().await.is_err());
        assert_eq!(queue.get_status(item.id), Some(QueueStatus::Pending));

        assert!(queue
            .enqueue(QueueOperation::Upload, payload([("item_id", "B")]))
            .await
            .is_err());
        assert_eq!(queue.size(), 1);
    }
}
