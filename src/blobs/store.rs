//! Blob store on the local filesystem
//!
//! Writes are atomic: data goes to a temporary file first and is renamed into
//! place, so a crash never leaves a half-written blob under its final name.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Result, SyncError};

use super::is_valid_digest;

/// Directory for streaming writes whose digest is not known yet
const INCOMING_DIR: &str = ".incoming";

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Deduplicated blob store keyed by SHA-256 digest
#[derive(Debug, Clone)]
pub struct ContentAddressedStorage {
    base_path: PathBuf,
}

impl ContentAddressedStorage {
    /// Open a store rooted at `base_path`, creating the directory if needed
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Path of the blob for `digest`: `base/xx/yy/<digest>`
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        if !is_valid_digest(digest) {
            return Err(SyncError::NotFound(format!("invalid digest: {}", digest)));
        }
        Ok(self
            .base_path
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(digest))
    }

    /// Store bytes, returning their digest. Existing blobs are never rewritten.
    pub async fn store(&self, data: &[u8]) -> Result<String> {
        let digest = compute_hash(data);
        let path = self.blob_path(&digest)?;

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(digest = %digest, "Blob already stored, reusing");
            return Ok(digest);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp_path, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::debug!(digest = %digest, size = data.len(), "Stored blob");
        Ok(digest)
    }

    /// Streaming variant of [`store`](Self::store) for files on disk
    pub async fn store_file(&self, source: impl AsRef<Path>) -> Result<String> {
        let incoming = self.base_path.join(INCOMING_DIR);
        tokio::fs::create_dir_all(&incoming).await?;
        let tmp_path = incoming.join(format!("{}.tmp", Uuid::new_v4().simple()));

        let digest = match copy_and_hash(source.as_ref(), &tmp_path).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };

        let path = self.blob_path(&digest)?;
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_file(&tmp_path).await?;
            tracing::debug!(digest = %digest, "Blob already stored, reusing");
            return Ok(digest);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            digest = %digest,
            source = %source.as_ref().display(),
            "Stored blob from file"
        );
        Ok(digest)
    }

    /// Read a blob back, verifying its content against the digest
    pub async fn retrieve(&self, digest: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(format!("blob {}", digest)));
            }
            Err(e) => return Err(e.into()),
        };

        let actual = compute_hash(&data);
        if actual != digest {
            tracing::error!(expected = %digest, actual = %actual, "Blob corruption detected on read");
            return Err(SyncError::Corrupted {
                expected: digest.to_string(),
                actual,
            });
        }

        Ok(data)
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn delete(&self, digest: &str) -> Result<()> {
        let path = self.blob_path(digest)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(digest = %digest, "Deleted blob"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Drop shard directories that became empty; a non-empty one fails and stays
        if let Some(inner) = path.parent() {
            if tokio::fs::remove_dir(inner).await.is_ok() {
                if let Some(outer) = inner.parent() {
                    let _ = tokio::fs::remove_dir(outer).await;
                }
            }
        }

        Ok(())
    }

    pub async fn exists(&self, digest: &str) -> Result<bool> {
        if !is_valid_digest(digest) {
            return Ok(false);
        }
        Ok(tokio::fs::try_exists(self.blob_path(digest)?).await?)
    }

    /// Size in bytes of a stored blob
    pub async fn size(&self, digest: &str) -> Result<u64> {
        let path = self.blob_path(digest)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::NotFound(format!("blob {}", digest)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored digest, sorted
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut digests = Vec::new();

        // Walk the two shard levels explicitly: base/xx/yy/<digest>
        let mut level0 = tokio::fs::read_dir(&self.base_path).await?;
        while let Some(d0) = level0.next_entry().await? {
            let Some(outer) = shard_name(&d0).await? else {
                continue;
            };
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                let Some(inner) = shard_name(&d1).await? else {
                    continue;
                };
                let prefix = format!("{}{}", outer, inner);
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if !entry.file_type().await?.is_file() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        if is_valid_digest(name) && name.starts_with(&prefix) {
                            digests.push(name.to_string());
                        }
                    }
                }
            }
        }

        digests.sort();
        Ok(digests)
    }

    /// Re-hash every blob and return the digests whose content no longer matches
    pub async fn verify_all(&self) -> Result<Vec<String>> {
        let mut corrupted = Vec::new();

        for digest in self.list_all().await? {
            let path = self.blob_path(&digest)?;
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if compute_hash(&data) != digest {
                tracing::warn!(digest = %digest, "Blob failed verification");
                corrupted.push(digest);
            }
        }

        Ok(corrupted)
    }
}

/// Returns the directory name if `entry` is a two-hex-character shard directory
async fn shard_name(entry: &tokio::fs::DirEntry) -> Result<Option<String>> {
    if !entry.file_type().await?.is_dir() {
        return Ok(None);
    }
    let name = entry.file_name();
    let Some(name) = name.to_str() else {
        return Ok(None);
    };
    if name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Ok(Some(name.to_string()))
    } else {
        Ok(None)
    }
}

async fn copy_and_hash(source: &Path, dest: &Path) -> Result<String> {
    let mut reader = tokio::fs::File::open(source).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(format!("file {}", source.display()))
        } else {
            SyncError::Io(e)
        }
    })?;
    let mut writer = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read]).await?;
    }

    writer.flush().await?;
    writer.sync_all().await?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Relative sharded key for a digest: `xx/yy/<digest>`
pub fn shard_key(digest: &str) -> String {
    if digest.len() < 4 {
        return digest.to_string();
    }
    format!("{}/{}/{}", &digest[0..2], &digest[2..4], digest)
}
