//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{timeout::TimeoutConfig, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::ByteStream,
    Client,
};
use chrono::DateTime;

use crate::error::{Result, StorageError, SyncError};
use crate::sync::SyncCredential;

use super::types::{ListOptions, ObjectList, ObjectMetadata};
use super::ObjectStore;

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "AuthorizationHeaderMalformed",
    "Unauthorized",
];

const QUOTA_CODES: &[&str] = &[
    "QuotaExceeded",
    "ServiceQuotaExceeded",
    "InsufficientStorage",
    "StorageLimitExceeded",
    "XMinioStorageFull",
];

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from a just-in-time credential
    pub async fn connect(credential: &SyncCredential, operation_timeout: Duration) -> Result<Self> {
        let endpoint = credential.provider.resolve()?;

        let credentials = Credentials::new(
            &credential.access_key_id,
            &credential.secret_access_key,
            credential.session_token.clone(),
            None,
            "memonexus",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&endpoint.url)
            .region(Region::new(endpoint.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(endpoint.force_path_style)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(operation_timeout)
                    .build(),
            )
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking the bucket; bad credentials fail fast
        let bucket = credential.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!(bucket = %bucket, endpoint = %endpoint.url, "Connected to S3 bucket");
            }
            Err(e) => {
                let err = classify_sdk_error("head bucket", &bucket, e);
                if matches!(err, StorageError::AccessDenied(_)) {
                    return Err(SyncError::Auth(err.to_string()));
                }
                tracing::warn!(
                    bucket = %bucket,
                    error = %err,
                    "Could not verify bucket. Will attempt operations anyway."
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Client {
    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), StorageError> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| classify_sdk_error("put object", key, e))?;

        tracing::debug!(key = %key, size = size, "Uploaded object");
        Ok(())
    }

    async fn download(&self, key: &str) -> std::result::Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("get object", key, e))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| {
                classify_error(None, &format!("Failed to read object body {}: {}", key, e), key)
            })?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_sdk_error("delete object", key, e))?;

        tracing::debug!(key = %key, "Deleted object");
        Ok(())
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify_sdk_error("head object", key, e) {
                StorageError::ObjectNotFound(_) => Ok(false),
                err => Err(err),
            },
        }
    }

    async fn list(&self, options: ListOptions) -> std::result::Result<ObjectList, StorageError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(prefix) = options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(delimiter) = options.delimiter {
            request = request.delimiter(delimiter);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        if let Some(start_after) = options.start_after {
            request = request.start_after(start_after);
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_sdk_error("list objects", &self.bucket, e))?;

        let objects: Vec<ObjectMetadata> = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0),
                last_modified: obj
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
                etag: obj.e_tag().map(|s| s.to_string()),
            })
            .collect();

        let prefixes: Vec<String> = response
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix().map(|s| s.to_string()))
            .collect();

        Ok(ObjectList {
            objects,
            prefixes,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }
}

/// Classify an SDK error: timeout capability first, then dispatch failure
/// types, then the service error code
fn classify_sdk_error<E, R>(operation: &str, key: &str, err: SdkError<E, R>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("Failed to {} {}: {}", operation, key, DisplayErrorContext(&err));

    match &err {
        SdkError::TimeoutError(_) => return StorageError::Timeout(message),
        SdkError::DispatchFailure(failure) => {
            if failure.is_timeout() {
                return StorageError::Timeout(message);
            }
            if failure.is_io() {
                return StorageError::ConnectionFailed(message);
            }
        }
        _ => {}
    }

    classify_error(err.code(), &message, key)
}

/// Map an error code and message onto a [`StorageError`]
pub fn classify_error(code: Option<&str>, message: &str, key: &str) -> StorageError {
    if let Some(code) = code {
        if AUTH_CODES.contains(&code) {
            return StorageError::AccessDenied(message.to_string());
        }
        if QUOTA_CODES.contains(&code) {
            return StorageError::QuotaExceeded(message.to_string());
        }
        match code {
            "NoSuchKey" | "NotFound" => return StorageError::ObjectNotFound(key.to_string()),
            "NoSuchBucket" => return StorageError::BucketNotFound(key.to_string()),
            "RequestTimeout" => return StorageError::Timeout(message.to_string()),
            _ => {}
        }
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        StorageError::Timeout(message.to_string())
    } else if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("dns error")
        || lower.contains("broken pipe")
    {
        StorageError::ConnectionFailed(message.to_string())
    } else if lower.contains("403") || lower.contains("forbidden") {
        StorageError::AccessDenied(message.to_string())
    } else if lower.contains("404") || lower.contains("nosuchkey") {
        StorageError::ObjectNotFound(key.to_string())
    } else {
        StorageError::SdkError(message.to_string())
    }
}
