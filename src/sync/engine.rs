//! Sync engine
//!
//! Drives one sync cycle at a time:
//!
//! 1. Preparing: fetch a credential and connect to the object store
//! 2. Uploading: drain the queue, publishing blobs and change records
//! 3. Downloading: list and fetch change records from other devices
//! 4. Reconciling: apply or resolve every pulled change, then advance the
//!    watermark
//!
//! # Remote layout
//!
//! ```text
//! {prefix}blobs/xx/yy/<digest>
//! {prefix}changes/<device_id>/<sequence:020>.json
//! ```
//!
//! Cancellation is checked between queue items and between remote changes,
//! never in the middle of a write, so an interrupted cycle resumes cleanly.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::blobs::{compute_hash, is_valid_digest, shard_key, ContentAddressedStorage};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::queue::{payload, QueueItem, QueueOperation, SyncQueue};
use crate::storage::{ObjectMetadata, ObjectStore};

use super::changelog::ChangeLog;
use super::conflict::{conflict_id, ConflictResolver, ConflictWinner};
use super::credentials::{CredentialSource, ObjectStoreConnector, S3Connector, StaticCredentials};
use super::repository::Repository;
use super::store::SqliteRepository;
use super::types::{
    ChangeLogEntry, ConflictRecord, OperationType, RemoteChange, SyncEvent, SyncItem, SyncResult,
    SyncState, Watermark,
};

const BLOB_CONTENT_TYPE: &str = "application/octet-stream";
const CHANGE_CONTENT_TYPE: &str = "application/json";

/// Callback for engine progress. Errors are logged and otherwise ignored.
pub type EventHandler = Arc<dyn Fn(&SyncEvent) -> anyhow::Result<()> + Send + Sync>;

// ============================================================================
// Sync Context
// ============================================================================

/// Cooperative cancellation and deadline for one cycle
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

struct EngineStatus {
    state: SyncState,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Change records fetched in the download stage
struct PulledBatch {
    changes: Vec<RemoteChange>,
    watermark: Watermark,
}

enum Applied {
    Skipped,
    FastForward,
    Conflict { remote_won: bool },
}

pub struct SyncEngine {
    device_id: String,
    prefix: String,
    queue: SyncQueue,
    blobs: ContentAddressedStorage,
    repo: Arc<dyn Repository>,
    changelog: ChangeLog,
    resolver: ConflictResolver,
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn ObjectStoreConnector>,
    handler: RwLock<Option<EventHandler>>,
    status: Mutex<EngineStatus>,
    running: AtomicBool,
}

/// Clears the running flag when a cycle ends, including on early return
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        device_id: impl Into<String>,
        queue: SyncQueue,
        blobs: ContentAddressedStorage,
        repo: Arc<dyn Repository>,
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn ObjectStoreConnector>,
    ) -> Self {
        let device_id = device_id.into();
        Self {
            changelog: ChangeLog::new(repo.clone(), device_id.clone()),
            device_id,
            prefix: String::new(),
            queue,
            blobs,
            repo,
            resolver: ConflictResolver::new(),
            credentials,
            connector,
            handler: RwLock::new(None),
            status: Mutex::new(EngineStatus {
                state: SyncState::Idle,
                last_sync: None,
                last_error: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Build an engine backed by SQLite, local blobs, and S3 from configuration
    pub async fn from_config(config: &Config, pool: SqlitePool) -> Result<Self> {
        if config.device.device_id.is_empty() || config.device.device_id.contains('/') {
            return Err(SyncError::InvalidConfig(format!(
                "invalid device id: {:?}",
                config.device.device_id
            )));
        }

        let queue = SyncQueue::open(&config.queue, pool.clone()).await?;
        let blobs = ContentAddressedStorage::new(&config.blobs.base_path).await?;
        let repo = Arc::new(SqliteRepository::new(pool));
        let credentials = Arc::new(StaticCredentials::from_config(&config.storage)?);
        let connector = Arc::new(S3Connector::new(Duration::from_secs(
            config.sync.operation_timeout_secs,
        )));

        Ok(Self::new(
            config.device.device_id.clone(),
            queue,
            blobs,
            repo,
            credentials,
            connector,
        )
        .with_prefix(&config.storage.prefix))
    }

    /// Key prefix for every remote object. A trailing `/` is added if missing.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        let prefix = prefix.trim_start_matches('/');
        self.prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        self
    }

    pub fn with_event_handler(self, handler: EventHandler) -> Self {
        *self.handler.write() = Some(handler);
        self
    }

    pub fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.write() = Some(handler);
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn blobs(&self) -> &ContentAddressedStorage {
        &self.blobs
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    pub fn status(&self) -> SyncState {
        self.status.lock().state
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.status.lock().last_sync
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.lock().last_error.clone()
    }

    /// Queued local operations plus remote change records not yet applied.
    ///
    /// Lists the other devices' change logs past the watermark, so it needs
    /// a credential and a reachable object store.
    pub async fn pending_changes(&self) -> Result<usize> {
        let store = self.connect().await?;
        let watermark = self.repo.watermark().await?;
        let remote: usize = self
            .remote_backlog(store.as_ref(), &watermark)
            .await?
            .iter()
            .map(|(_, objects)| objects.len())
            .sum();

        Ok(self.queue.size() + remote)
    }

    pub async fn conflicts(&self, item_id: Option<&str>) -> Result<Vec<ConflictRecord>> {
        self.repo.conflicts(item_id).await
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Record a local mutation and queue it for publishing.
    ///
    /// `content` is stored in content-addressed storage; when `None` the
    /// item keeps its previous blob.
    pub async fn track_change(
        &self,
        item_id: &str,
        operation: OperationType,
        content: Option<&[u8]>,
        data: serde_json::Value,
    ) -> Result<ChangeLogEntry> {
        let existing = self.repo.get_item(item_id).await?;
        let version = existing.as_ref().map_or(0, |item| item.version) + 1;
        self.changelog
            .validate_local(item_id, operation, version)
            .await?;

        let content_digest = match content {
            Some(bytes) => Some(self.blobs.store(bytes).await?),
            None => existing.as_ref().and_then(|item| item.content_digest.clone()),
        };

        // updated_at never decreases within this device's history
        let now = Utc::now();
        let updated_at = existing
            .as_ref()
            .map_or(now, |item| item.updated_at.max(now));

        let item = SyncItem {
            id: item_id.to_string(),
            version,
            updated_at,
            deleted: operation == OperationType::Delete,
            content_digest,
            data,
            pushed_version: existing.as_ref().map_or(0, |item| item.pushed_version),
            synced_entry: existing.as_ref().and_then(|item| item.synced_entry),
        };
        let entry = ChangeLogEntry::new(item_id, operation, version, updated_at, &self.device_id);
        self.repo.apply_change(&item, &entry).await?;

        let queue_op = match operation {
            OperationType::Delete => QueueOperation::Delete,
            _ => QueueOperation::Upload,
        };
        // A queued publish always sends the latest state
        if self.queue.find_pending(item_id, queue_op).is_none() {
            self.queue
                .enqueue(queue_op, payload([("item_id", item_id)]))
                .await?;
        }

        tracing::debug!(
            item_id = %item_id,
            operation = %operation,
            version = version,
            "Tracked local change"
        );

        Ok(entry)
    }

    // ========================================================================
    // Sync Cycle
    // ========================================================================

    /// Run one sync cycle. Fails fast with `AlreadyRunning` if another cycle
    /// is in flight.
    pub async fn sync(&self, ctx: &SyncContext) -> Result<SyncResult> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        let started = Instant::now();
        tracing::info!(device_id = %self.device_id, "Starting sync cycle");

        match self.run_cycle(ctx, started).await {
            Ok(result) => {
                {
                    let mut status = self.status.lock();
                    status.last_sync = Some(Utc::now());
                    status.last_error = None;
                }
                self.set_state(SyncState::Idle);
                self.emit(SyncEvent::Completed(result.clone()));

                tracing::info!(
                    uploaded = result.uploaded,
                    downloaded = result.downloaded,
                    conflicts = result.conflicts,
                    duration_ms = result.duration.as_millis() as u64,
                    "Sync cycle complete"
                );
                Ok(result)
            }
            Err(err) => {
                if matches!(err, SyncError::Network(_)) {
                    if let Err(e) = self.queue.set_online_status(false).await {
                        tracing::warn!(error = %e, "Failed to mark sync queue offline");
                    }
                }

                self.status.lock().last_error = Some(err.to_string());
                self.set_state(SyncState::Failed);
                self.emit(SyncEvent::Failed(err.to_string()));
                self.set_state(SyncState::Idle);

                tracing::warn!(error = %err, "Sync cycle failed");
                Err(err)
            }
        }
    }

    async fn run_cycle(&self, ctx: &SyncContext, started: Instant) -> Result<SyncResult> {
        self.set_state(SyncState::Preparing);
        ctx.check()?;
        let store = self.connect().await?;

        self.set_state(SyncState::Uploading);
        let uploaded = self.push(store.as_ref(), ctx).await?;

        self.set_state(SyncState::Downloading);
        let batch = self.pull(store.as_ref(), ctx).await?;

        self.set_state(SyncState::Reconciling);
        let (downloaded, conflicts) = self.reconcile(store.as_ref(), batch, ctx).await?;

        Ok(SyncResult {
            uploaded,
            downloaded,
            conflicts,
            duration: started.elapsed(),
        })
    }

    // ========================================================================
    // Upload
    // ========================================================================

    async fn push(&self, store: &dyn ObjectStore, ctx: &SyncContext) -> Result<usize> {
        let mut uploaded = 0;

        loop {
            ctx.check()?;
            let Some(item) = self.queue.dequeue().await? else {
                break;
            };

            match self.process(store, &item).await {
                Ok(published) => {
                    self.queue.complete(item.id).await?;
                    if published {
                        uploaded += 1;
                    }
                }
                Err(err) if err.is_terminal() || matches!(err, SyncError::Network(_)) => {
                    self.queue.failed(item.id, &err.to_string()).await?;
                    return Err(err);
                }
                Err(err) if err.is_permanent() => {
                    tracing::warn!(
                        id = %item.id,
                        operation = %item.operation,
                        error = %err,
                        "Dropping sync operation that cannot succeed"
                    );
                    self.queue.remove(item.id).await?;
                    self.emit(SyncEvent::ItemFailed {
                        queue_id: item.id,
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    self.queue.failed(item.id, &err.to_string()).await?;
                    self.emit(SyncEvent::ItemFailed {
                        queue_id: item.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(uploaded)
    }

    /// Execute one queue item. Returns whether a change record was published.
    async fn process(&self, store: &dyn ObjectStore, item: &QueueItem) -> Result<bool> {
        match item.operation {
            QueueOperation::Upload => {
                let item_id = required(item, "item_id")?;
                self.publish(store, item_id).await
            }
            QueueOperation::Delete => {
                let item_id = required(item, "item_id")?;
                let published = self.publish(store, item_id).await?;
                if let Some(key) = item.payload_value("key") {
                    store.delete(&format!("{}{}", self.prefix, key)).await?;
                }
                Ok(published)
            }
            QueueOperation::Download => {
                let digest = required(item, "digest")?;
                self.fetch_blob(store, digest).await?;
                Ok(false)
            }
        }
    }

    /// Publish the latest local state of an item if it has not been
    async fn publish(&self, store: &dyn ObjectStore, item_id: &str) -> Result<bool> {
        let item = self
            .repo
            .get_item(item_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("item {}", item_id)))?;

        if !item.has_unpushed_changes() {
            return Ok(false);
        }

        let entry = self
            .repo
            .last_change(item_id)
            .await?
            .filter(|entry| entry.origin == self.device_id && entry.version == item.version)
            .ok_or_else(|| SyncError::NotFound(format!("local change for {}", item_id)))?;

        if !item.deleted {
            if let Some(digest) = &item.content_digest {
                let key = self.blob_key(digest);
                if !store.exists(&key).await? {
                    let data = self.blobs.retrieve(digest).await?;
                    store.upload(&key, data, BLOB_CONTENT_TYPE).await?;
                    tracing::debug!(digest = %digest, "Uploaded blob");
                }
            }
        }

        let sequence = self.repo.next_push_sequence().await?;
        let change = RemoteChange {
            entry,
            item: item.clone(),
            base: item.synced_entry,
        };
        let body = serde_json::to_vec(&change)?;
        store
            .upload(
                &self.change_key(&self.device_id, sequence),
                body,
                CHANGE_CONTENT_TYPE,
            )
            .await?;
        self.repo
            .mark_pushed(item_id, item.version, change.entry.id)
            .await?;

        tracing::debug!(
            item_id = %item_id,
            version = item.version,
            sequence = sequence,
            "Published change"
        );
        self.emit(SyncEvent::ItemUploaded {
            item_id: item_id.to_string(),
            version: item.version,
        });

        Ok(true)
    }

    // ========================================================================
    // Download
    // ========================================================================

    async fn pull(&self, store: &dyn ObjectStore, ctx: &SyncContext) -> Result<PulledBatch> {
        let mut watermark = self.repo.watermark().await?;
        let mut changes = Vec::new();

        for (device, objects) in self.remote_backlog(store, &watermark).await? {
            for object in objects {
                ctx.check()?;
                let Some(sequence) = parse_sequence(&object.key) else {
                    tracing::warn!(key = %object.key, "Ignoring unexpected object in change log");
                    continue;
                };

                let body = store.download(&object.key).await?;
                match serde_json::from_slice::<RemoteChange>(&body) {
                    Ok(change) if change.entry.origin == device => changes.push(change),
                    Ok(change) => {
                        tracing::warn!(
                            key = %object.key,
                            origin = %change.entry.origin,
                            "Skipping change record published under another device"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(key = %object.key, error = %e, "Skipping malformed change record");
                    }
                }
                watermark.advance(&device, sequence);
            }
        }

        tracing::debug!(count = changes.len(), "Pulled remote changes");

        Ok(PulledBatch { changes, watermark })
    }

    /// Change records of every other device published after `watermark`
    async fn remote_backlog(
        &self,
        store: &dyn ObjectStore,
        watermark: &Watermark,
    ) -> Result<Vec<(String, Vec<ObjectMetadata>)>> {
        let root = format!("{}changes/", self.prefix);
        let mut backlog = Vec::new();

        for device_prefix in store.list_prefixes(&root).await? {
            let Some(device) = device_prefix.strip_prefix(&root) else {
                continue;
            };
            let device = device.trim_end_matches('/');
            if device.is_empty() || device == self.device_id {
                continue;
            }

            let after = watermark.get(device);
            let start_after = (after > 0).then(|| self.change_key(device, after));
            let objects = store
                .list_all(&device_prefix, start_after.as_deref())
                .await?;
            if !objects.is_empty() {
                backlog.push((device.to_string(), objects));
            }
        }

        Ok(backlog)
    }

    // ========================================================================
    // Reconcile
    // ========================================================================

    async fn reconcile(
        &self,
        store: &dyn ObjectStore,
        batch: PulledBatch,
        ctx: &SyncContext,
    ) -> Result<(usize, usize)> {
        let mut downloaded = 0;
        let mut conflicts = 0;

        for change in &batch.changes {
            ctx.check()?;

            match self.apply_remote(store, change).await? {
                Applied::Skipped => {}
                Applied::FastForward => downloaded += 1,
                Applied::Conflict { remote_won } => {
                    conflicts += 1;
                    if remote_won {
                        downloaded += 1;
                    }
                }
            }
        }

        // Only after the whole batch is applied
        self.repo.set_watermark(&batch.watermark).await?;

        Ok((downloaded, conflicts))
    }

    async fn apply_remote(&self, store: &dyn ObjectStore, change: &RemoteChange) -> Result<Applied> {
        let entry = &change.entry;

        if self.repo.has_change(entry.id).await? {
            return Ok(Applied::Skipped);
        }
        if entry.item_id != change.item.id {
            tracing::warn!(entry_id = %entry.id, "Change record does not match its item");
            return Ok(Applied::Skipped);
        }
        match self.changelog.validate_remote(entry).await {
            Ok(()) => {}
            Err(err @ SyncError::InvalidVersion { .. }) => {
                tracing::warn!(
                    entry_id = %entry.id,
                    origin = %entry.origin,
                    error = %err,
                    "Rejecting remote change"
                );
                return Ok(Applied::Skipped);
            }
            Err(err) => return Err(err),
        }

        let Some(local) = self.repo.get_item(&entry.item_id).await? else {
            self.apply(store, change, entry.version).await?;
            return Ok(Applied::FastForward);
        };

        if !self.resolver.detect_conflict(&local, change) {
            self.apply(store, change, local.version.max(entry.version))
                .await?;
            return Ok(Applied::FastForward);
        }

        if self
            .repo
            .has_conflict(conflict_id(&entry.item_id, entry.id))
            .await?
        {
            return Ok(Applied::Skipped);
        }

        let local_entry = self.repo.last_change(&entry.item_id).await?;
        let resolved = self.resolver.resolve(&local, local_entry.as_ref(), change);
        let remote_won = resolved.winner == ConflictWinner::Remote;

        if remote_won {
            self.apply(store, change, local.version.max(entry.version))
                .await?;
            let dropped = self.queue.remove_pending_for(&entry.item_id).await?;
            if dropped > 0 {
                tracing::debug!(
                    item_id = %entry.item_id,
                    dropped = dropped,
                    "Discarded queued local changes that lost a conflict"
                );
            }
        }

        self.repo.record_conflict(&resolved.record).await?;

        tracing::info!(
            item_id = %entry.item_id,
            origin = %entry.origin,
            remote_won = remote_won,
            "Resolved conflict"
        );
        self.emit(SyncEvent::ConflictResolved {
            record: resolved.record,
            remote_won,
        });

        Ok(Applied::Conflict { remote_won })
    }

    /// Adopt a remote change as the local state at `version`
    async fn apply(&self, store: &dyn ObjectStore, change: &RemoteChange, version: u64) -> Result<()> {
        if !change.item.deleted {
            if let Some(digest) = &change.item.content_digest {
                self.ensure_blob(store, digest).await?;
            }
        }

        let item = SyncItem {
            version,
            pushed_version: version,
            synced_entry: Some(change.entry.id),
            ..change.item.clone()
        };
        self.repo.apply_change(&item, &change.entry).await?;

        self.emit(SyncEvent::ChangeApplied {
            item_id: item.id,
            version,
            origin: change.entry.origin.clone(),
        });
        Ok(())
    }

    /// Make a referenced blob available locally, queueing a download when
    /// it cannot be fetched right now
    async fn ensure_blob(&self, store: &dyn ObjectStore, digest: &str) -> Result<()> {
        if !is_valid_digest(digest) {
            tracing::warn!(digest = %digest, "Ignoring invalid blob digest");
            return Ok(());
        }
        if self.blobs.exists(digest).await? {
            return Ok(());
        }

        match self.fetch_blob(store, digest).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() || err.is_permanent() => {
                tracing::warn!(digest = %digest, error = %err, "Deferring blob download");
                let queued = self.queue.list().iter().any(|item| {
                    item.operation == QueueOperation::Download
                        && item.payload_value("digest") == Some(digest)
                });
                if queued {
                    return Ok(());
                }
                match self
                    .queue
                    .enqueue(QueueOperation::Download, payload([("digest", digest)]))
                    .await
                {
                    Ok(_) => Ok(()),
                    // Fetched again on the next change that references it
                    Err(SyncError::Capacity { max }) => {
                        tracing::warn!(
                            digest = %digest,
                            max = max,
                            "Sync queue full, not deferring blob download"
                        );
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn fetch_blob(&self, store: &dyn ObjectStore, digest: &str) -> Result<()> {
        if self.blobs.exists(digest).await? {
            return Ok(());
        }

        let data = store.download(&self.blob_key(digest)).await?;
        let actual = compute_hash(&data);
        if actual != digest {
            return Err(SyncError::Corrupted {
                expected: digest.to_string(),
                actual,
            });
        }

        self.blobs.store(&data).await?;
        tracing::debug!(digest = %digest, "Downloaded blob");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Fetch a credential just for this connection; it is dropped on return
    async fn connect(&self) -> Result<Arc<dyn ObjectStore>> {
        let credential = self.credentials.credential().await?;
        self.connector.connect(&credential).await
    }

    fn blob_key(&self, digest: &str) -> String {
        format!("{}blobs/{}", self.prefix, shard_key(digest))
    }

    fn change_key(&self, device: &str, sequence: u64) -> String {
        format!("{}changes/{}/{:020}.json", self.prefix, device, sequence)
    }

    fn set_state(&self, state: SyncState) {
        let changed = {
            let mut status = self.status.lock();
            std::mem::replace(&mut status.state, state) != state
        };
        if changed {
            tracing::debug!(state = %state, "Sync state changed");
            self.emit(SyncEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SyncEvent) {
        let Some(handler) = self.handler.read().clone() else {
            return;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Sync event handler failed"),
            Err(_) => tracing::error!("Sync event handler panicked"),
        }
    }
}

fn required<'a>(item: &'a QueueItem, key: &str) -> Result<&'a str> {
    item.payload_value(key).ok_or_else(|| {
        SyncError::NotFound(format!("payload key {:?} in queue item {}", key, item.id))
    })
}

/// Sequence number from `.../<sequence:020>.json`
fn parse_sequence(key: &str) -> Option<u64> {
    key.rsplit('/')
        .next()?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

// ============================================================================
// Tests
// ============================================================================
