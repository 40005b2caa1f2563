//! In-memory object store
//!
//! Useful for testing and for running the engine without a bucket. Supports
//! simple fault injection so callers can exercise retry paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::error::StorageError;

use super::types::{ListOptions, ObjectList, ObjectMetadata};
use super::ObjectStore;

/// In-memory object store backed by a `RwLock<BTreeMap>`
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    /// Errors returned by the next operations, in order
    failures: Mutex<VecDeque<StorageError>>,
    offline: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next operation fail with `err`
    pub fn fail_next(&self, err: StorageError) {
        self.failures.lock().push_back(err);
    }

    /// While offline every operation fails with a connection error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).cloned()
    }

    /// Overwrite an object directly, bypassing fault injection
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.objects.write().insert(key.into(), data);
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionFailed(format!(
                "connection refused: {}",
                key
            )));
        }
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.check(key)?;
        self.objects.write().insert(key.to_string(), data);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check(key)?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.objects.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.check(key)?;
        Ok(self.objects.read().contains_key(key))
    }

    async fn list(&self, options: ListOptions) -> Result<ObjectList, StorageError> {
        let prefix = options.prefix.unwrap_or_default();
        self.check(&prefix)?;

        let max_keys = options.max_keys.unwrap_or(1000).max(1) as usize;
        // Continuation tokens are the last key of the previous page
        let after = match (options.continuation_token, options.start_after) {
            (Some(token), _) => Some(token),
            (None, start_after) => start_after,
        };

        let objects = self.objects.read();
        let mut list = ObjectList::default();
        let mut prefixes = BTreeSet::new();
        let mut last_key = None;

        for (key, data) in objects.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if after.as_deref().is_some_and(|after| key.as_str() <= after) {
                continue;
            }
            if list.objects.len() + prefixes.len() >= max_keys {
                list.is_truncated = true;
                list.continuation_token = last_key;
                break;
            }

            let rest = &key[prefix.len()..];
            match options.delimiter.as_deref().and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((delimiter, index)) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..index + delimiter.len()]));
                }
                None => list.objects.push(ObjectMetadata {
                    key: key.clone(),
                    size: data.len() as i64,
                    last_modified: Some(Utc::now()),
                    etag: None,
                }),
            }
            last_key = Some(key.clone());
        }

        list.prefixes = prefixes.into_iter().collect();
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let store = MemoryObjectStore::new();

        store.upload("a/b", b"data".to_vec(), "text/plain").await.unwrap();
        assert!(store.exists("a/b").await.unwrap());
        assert_eq!(store.download("a/b").await.unwrap(), b"data");

        store.delete("a/b").await.unwrap();
        store.delete("a/b").await.unwrap();
        assert!(matches!(
            store.download("a/b").await,
            Err(StorageError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_all_paginates_after_start_key() {
        let store = MemoryObjectStore::new();
        for i in 0..2500 {
            store.insert(format!("changes/dev/{:020}.json", i), vec![]);
        }
        store.insert("other/key", vec![]);

        let after = format!("changes/dev/{:020}.json", 99);
        let listed = store.list_all("changes/", Some(&after)).await.unwrap();

        assert_eq!(listed.len(), 2400);
        assert_eq!(listed[0].key, format!("changes/dev/{:020}.json", 100));
    }

    #[tokio::test]
    async fn test_list_prefixes() {
        let store = MemoryObjectStore::new();
        store.insert("changes/device-a/1.json", vec![]);
        store.insert("changes/device-a/2.json", vec![]);
        store.insert("changes/device-b/1.json", vec![]);

        let prefixes = store.list_prefixes("changes/").await.unwrap();
        assert_eq!(prefixes, vec!["changes/device-a/", "changes/device-b/"]);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = MemoryObjectStore::new();
        store.fail_next(StorageError::Timeout("injected".into()));

        assert!(matches!(
            store.upload("k", vec![], "x").await,
            Err(StorageError::Timeout(_))
        ));
        store.upload("k", vec![], "x").await.unwrap();

        store.set_offline(true);
        assert!(matches!(
            store.exists("k").await,
            Err(StorageError::ConnectionFailed(_))
        ));
    }
}
