//! Configuration management for the MemoNexus sync engine

use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::queue::{DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub blobs: BlobConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
}

#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Custom endpoint (MinIO and other self-hosted deployments)
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: Option<String>,
    /// Cloudflare account id (R2 only)
    pub account_id: Option<String>,
    pub use_ssl: bool,
    pub access_key: String,
    pub secret_key: String,
    /// Key prefix applied to every remote object
    pub prefix: String,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("use_ssl", &self.use_ssl)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Aws,
    R2,
    Minio,
}

impl StorageProvider {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "aws" | "s3" => StorageProvider::Aws,
            "r2" => StorageProvider::R2,
            _ => StorageProvider::Minio,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub max_size: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    pub base_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between cycles when running as a daemon (0 = run once)
    pub interval_secs: u64,
    /// Upper bound for a single cycle
    pub timeout_secs: u64,
    /// Per-request timeout for object store calls
    pub operation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                device_id: "local".to_string(),
            },
            storage: StorageConfig {
                provider: StorageProvider::Minio,
                endpoint: Some("localhost:9000".to_string()),
                bucket: "memonexus".to_string(),
                region: Some("us-east-1".to_string()),
                account_id: None,
                use_ssl: false,
                access_key: "admin".to_string(),
                secret_key: "password123".to_string(),
                prefix: String::new(),
            },
            queue: QueueConfig {
                max_size: DEFAULT_MAX_QUEUE_SIZE,
                max_retries: DEFAULT_MAX_RETRIES,
            },
            blobs: BlobConfig {
                base_path: PathBuf::from("./blobs"),
            },
            database: DatabaseConfig {
                url: "sqlite:./memonexus.db".to_string(),
            },
            sync: SyncConfig {
                interval_secs: 0,
                timeout_secs: 300,
                operation_timeout_secs: 30,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let defaults = Config::default();

        Ok(Config {
            device: DeviceConfig {
                device_id: env::var("DEVICE_ID")?,
            },
            storage: StorageConfig {
                provider: StorageProvider::parse(
                    &env::var("S3_PROVIDER").unwrap_or_else(|_| "minio".to_string()),
                ),
                endpoint: env::var("S3_ENDPOINT").ok(),
                bucket: env::var("S3_BUCKET")?,
                region: env::var("S3_REGION").ok(),
                account_id: env::var("R2_ACCOUNT_ID").ok(),
                use_ssl: env::var("S3_USE_SSL")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                access_key: env::var("S3_ACCESS_KEY")?,
                secret_key: env::var("S3_SECRET_KEY")?,
                prefix: env::var("S3_PREFIX").unwrap_or_default(),
            },
            queue: QueueConfig {
                max_size: parse_or("SYNC_QUEUE_MAX_SIZE", defaults.queue.max_size),
                max_retries: parse_or("SYNC_MAX_RETRIES", defaults.queue.max_retries),
            },
            blobs: BlobConfig {
                base_path: env::var("BLOB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.blobs.base_path),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            sync: SyncConfig {
                interval_secs: parse_or("SYNC_INTERVAL_SECS", defaults.sync.interval_secs),
                timeout_secs: parse_or("SYNC_TIMEOUT_SECS", defaults.sync.timeout_secs),
                operation_timeout_secs: parse_or(
                    "S3_OPERATION_TIMEOUT_SECS",
                    defaults.sync.operation_timeout_secs,
                ),
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(StorageProvider::parse("aws"), StorageProvider::Aws);
        assert_eq!(StorageProvider::parse("S3"), StorageProvider::Aws);
        assert_eq!(StorageProvider::parse("r2"), StorageProvider::R2);
        assert_eq!(StorageProvider::parse("minio"), StorageProvider::Minio);
        assert_eq!(StorageProvider::parse("custom"), StorageProvider::Minio);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = Config::default();
        let printed = format!("{:?}", config.storage);
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("password123"));
    }
}
