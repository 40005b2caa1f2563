//! Object store adapter for S3-compatible backends
//!
//! Supports AWS S3, Cloudflare R2, and MinIO or other self-hosted endpoints
//! behind one [`ObjectStore`] trait. Provider differences (endpoint shape,
//! signing region, path-style addressing) are settled once at construction
//! in [`provider`]; after that every backend is used the same way.

mod memory;
mod provider;
mod s3_client;
mod types;

pub use memory::MemoryObjectStore;
pub use provider::{aws_endpoint, ProviderConfig, ResolvedEndpoint, AWS_GLOBAL_ENDPOINT};
pub use s3_client::{classify_error, S3Client};
pub use types::*;

use crate::error::StorageError;

/// Uniform push/pull/delete contract over an object store bucket
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write an object, replacing any existing one under `key`
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<(), StorageError>;

    /// Read an object's bytes
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete an object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// List one page of objects
    async fn list(&self, options: ListOptions) -> Result<ObjectList, StorageError>;

    /// List all objects under `prefix` after `start_after` (handles pagination)
    async fn list_all(
        &self,
        prefix: &str,
        start_after: Option<&str>,
    ) -> Result<Vec<ObjectMetadata>, StorageError> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000).with_prefix(prefix);

            if let Some(key) = start_after {
                options = options.with_start_after(key);
            }

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list(options).await?;
            all_objects.extend(result.objects);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        Ok(all_objects)
    }

    /// List the "directories" directly below `prefix`
    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut prefixes = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new()
                .with_max_keys(1000)
                .with_prefix(prefix)
                .with_delimiter("/");

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list(options).await?;
            prefixes.extend(result.prefixes);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        // A prefix can straddle a page boundary
        prefixes.sort();
        prefixes.dedup();
        Ok(prefixes)
    }
}
