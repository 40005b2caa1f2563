//! Just-in-time credentials and object store connections
//!
//! The engine asks for a credential at the start of every cycle and drops it
//! when the cycle ends. Nothing here persists secrets.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::storage::{ObjectStore, ProviderConfig, S3Client};

/// Decrypted access to one bucket
#[derive(Clone)]
pub struct SyncCredential {
    pub provider: ProviderConfig,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for SyncCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCredential")
            .field("provider", &self.provider)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl SyncCredential {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            provider: ProviderConfig::from_storage_config(config)?,
            bucket: config.bucket.clone(),
            access_key_id: config.access_key.clone(),
            secret_access_key: config.secret_key.clone(),
            session_token: None,
        })
    }
}

/// Supplies a credential for each sync cycle
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credential(&self) -> Result<SyncCredential>;
}

/// A fixed credential, typically read from configuration
pub struct StaticCredentials {
    credential: SyncCredential,
}

impl StaticCredentials {
    pub fn new(credential: SyncCredential) -> Self {
        Self { credential }
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Ok(Self::new(SyncCredential::from_config(config)?))
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credential(&self) -> Result<SyncCredential> {
        Ok(self.credential.clone())
    }
}

/// Builds an object store client from a credential
#[async_trait]
pub trait ObjectStoreConnector: Send + Sync {
    async fn connect(&self, credential: &SyncCredential) -> Result<Arc<dyn ObjectStore>>;
}

/// Connects to S3-compatible providers through the AWS SDK
pub struct S3Connector {
    operation_timeout: Duration,
}

impl S3Connector {
    pub fn new(operation_timeout: Duration) -> Self {
        Self { operation_timeout }
    }
}

#[async_trait]
impl ObjectStoreConnector for S3Connector {
    async fn connect(&self, credential: &SyncCredential) -> Result<Arc<dyn ObjectStore>> {
        let client = S3Client::connect(credential, self.operation_timeout).await?;
        Ok(Arc::new(client))
    }
}
