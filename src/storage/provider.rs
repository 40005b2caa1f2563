//! Provider-specific endpoint resolution

use serde::{Deserialize, Serialize};

use crate::config::{StorageConfig, StorageProvider};
use crate::error::{Result, SyncError};

/// Endpoint used for regions missing from the table
pub const AWS_GLOBAL_ENDPOINT: &str = "s3.amazonaws.com";

/// Signing region used with the global endpoint
const AWS_DEFAULT_REGION: &str = "us-east-1";

/// Known AWS regions and their S3 hostnames
const AWS_REGIONS: &[(&str, &str)] = &[
    ("us-east-1", "s3.us-east-1.amazonaws.com"),
    ("us-east-2", "s3.us-east-2.amazonaws.com"),
    ("us-west-1", "s3.us-west-1.amazonaws.com"),
    ("us-west-2", "s3.us-west-2.amazonaws.com"),
    ("ca-central-1", "s3.ca-central-1.amazonaws.com"),
    ("sa-east-1", "s3.sa-east-1.amazonaws.com"),
    ("eu-west-1", "s3.eu-west-1.amazonaws.com"),
    ("eu-west-2", "s3.eu-west-2.amazonaws.com"),
    ("eu-west-3", "s3.eu-west-3.amazonaws.com"),
    ("eu-central-1", "s3.eu-central-1.amazonaws.com"),
    ("eu-central-2", "s3.eu-central-2.amazonaws.com"),
    ("eu-north-1", "s3.eu-north-1.amazonaws.com"),
    ("eu-south-1", "s3.eu-south-1.amazonaws.com"),
    ("ap-east-1", "s3.ap-east-1.amazonaws.com"),
    ("ap-south-1", "s3.ap-south-1.amazonaws.com"),
    ("ap-northeast-1", "s3.ap-northeast-1.amazonaws.com"),
    ("ap-northeast-2", "s3.ap-northeast-2.amazonaws.com"),
    ("ap-northeast-3", "s3.ap-northeast-3.amazonaws.com"),
    ("ap-southeast-1", "s3.ap-southeast-1.amazonaws.com"),
    ("ap-southeast-2", "s3.ap-southeast-2.amazonaws.com"),
    ("me-south-1", "s3.me-south-1.amazonaws.com"),
    ("af-south-1", "s3.af-south-1.amazonaws.com"),
];

/// Look up the S3 hostname for an AWS region
pub fn aws_endpoint(region: &str) -> Option<&'static str> {
    AWS_REGIONS
        .iter()
        .find(|(name, _)| *name == region)
        .map(|(_, host)| *host)
}

/// Where and how to reach one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Aws {
        region: String,
    },
    R2 {
        account_id: String,
    },
    Minio {
        endpoint: String,
        use_ssl: bool,
        #[serde(default)]
        region: Option<String>,
    },
}

/// A provider configuration reduced to what the S3 client needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Base URL including scheme, without trailing slash
    pub url: String,
    /// Region used for request signing
    pub region: String,
    /// Bucket in the URL path instead of the hostname
    pub force_path_style: bool,
}

impl ProviderConfig {
    pub fn from_storage_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::Aws => Ok(ProviderConfig::Aws {
                region: config
                    .region
                    .clone()
                    .unwrap_or_else(|| AWS_DEFAULT_REGION.to_string()),
            }),
            StorageProvider::R2 => Ok(ProviderConfig::R2 {
                account_id: config.account_id.clone().ok_or_else(|| {
                    SyncError::InvalidConfig("R2 requires an account id".to_string())
                })?,
            }),
            StorageProvider::Minio => Ok(ProviderConfig::Minio {
                endpoint: config.endpoint.clone().ok_or_else(|| {
                    SyncError::InvalidConfig("custom provider requires an endpoint".to_string())
                })?,
                use_ssl: config.use_ssl,
                region: config.region.clone(),
            }),
        }
    }

    /// Resolve the endpoint URL, signing region, and addressing style
    pub fn resolve(&self) -> Result<ResolvedEndpoint> {
        match self {
            ProviderConfig::Aws { region } => {
                let (host, region) = match aws_endpoint(region) {
                    Some(host) => (host, region.as_str()),
                    None => {
                        tracing::warn!(
                            region = %region,
                            "Unknown AWS region, falling back to the global endpoint"
                        );
                        (AWS_GLOBAL_ENDPOINT, AWS_DEFAULT_REGION)
                    }
                };
                Ok(ResolvedEndpoint {
                    url: format!("https://{}", host),
                    region: region.to_string(),
                    force_path_style: false,
                })
            }
            ProviderConfig::R2 { account_id } => {
                validate_r2_account_id(account_id)?;
                Ok(ResolvedEndpoint {
                    url: format!("https://{}.r2.cloudflarestorage.com", account_id),
                    region: "auto".to_string(),
                    force_path_style: false,
                })
            }
            ProviderConfig::Minio {
                endpoint,
                use_ssl,
                region,
            } => Ok(ResolvedEndpoint {
                url: normalize_endpoint(endpoint, *use_ssl)?,
                region: region
                    .clone()
                    .unwrap_or_else(|| AWS_DEFAULT_REGION.to_string()),
                // Self-hosted deployments rarely have wildcard DNS/TLS for bucket subdomains
                force_path_style: true,
            }),
        }
    }
}

fn validate_r2_account_id(account_id: &str) -> Result<()> {
    if account_id.len() == 32 && account_id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(SyncError::InvalidConfig(format!(
            "R2 account id must be 32 hex characters, got {:?}",
            account_id
        )))
    }
}

fn normalize_endpoint(endpoint: &str, use_ssl: bool) -> Result<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(SyncError::InvalidConfig("endpoint is empty".to_string()));
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Ok(trimmed.to_string())
    } else {
        let scheme = if use_ssl { "https" } else { "http" };
        Ok(format!("{}://{}", scheme, trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aws_known_region() {
        let resolved = ProviderConfig::Aws {
            region: "eu-central-1".to_string(),
        }
        .resolve()
        .unwrap();

        assert_eq!(resolved.url, "https://s3.eu-central-1.amazonaws.com");
        assert_eq!(resolved.region, "eu-central-1");
        assert!(!resolved.force_path_style);
    }

    #[test]
    fn test_aws_unknown_region_falls_back() {
        assert_eq!(aws_endpoint("xx-fake-1"), None);

        let resolved = ProviderConfig::Aws {
            region: "xx-fake-1".to_string(),
        }
        .resolve()
        .unwrap();

        assert_eq!(resolved.url, format!("https://{}", AWS_GLOBAL_ENDPOINT));
    }

    #[test]
    fn test_aws_region_table_size() {
        assert!(AWS_REGIONS.len() >= 20);
    }

    #[test]
    fn test_r2_endpoint() {
        let account = "0123456789abcdef0123456789ABCDEF";
        let resolved = ProviderConfig::R2 {
            account_id: account.to_string(),
        }
        .resolve()
        .unwrap();

        assert_eq!(
            resolved.url,
            format!("https://{}.r2.cloudflarestorage.com", account)
        );
        assert_eq!(resolved.region, "auto");
        assert!(!resolved.force_path_style);
    }

    #[test]
    fn test_r2_rejects_bad_account_id() {
        for bad in ["", "abc", "0123456789abcdef0123456789abcdeg"] {
            let result = ProviderConfig::R2 {
                account_id: bad.to_string(),
            }
            .resolve();
            assert!(matches!(result, Err(SyncError::InvalidConfig(_))), "{}", bad);
        }
    }

    #[test]
    fn test_minio_endpoint_normalization() {
        let plain = ProviderConfig::Minio {
            endpoint: "localhost:9000".to_string(),
            use_ssl: false,
            region: None,
        }
        .resolve()
        .unwrap();
        let slashed = ProviderConfig::Minio {
            endpoint: "localhost:9000/".to_string(),
            use_ssl: false,
            region: None,
        }
        .resolve()
        .unwrap();

        assert_eq!(plain.url, "http://localhost:9000");
        assert_eq!(plain, slashed);
        assert!(plain.force_path_style);
    }

    #[test]
    fn test_minio_keeps_explicit_scheme() {
        let resolved = ProviderConfig::Minio {
            endpoint: "https://minio.example.org/".to_string(),
            use_ssl: false,
            region: Some("home".to_string()),
        }
        .resolve()
        .unwrap();

        assert_eq!(resolved.url, "https://minio.example.org");
        assert_eq!(resolved.region, "home");

        let ssl = ProviderConfig::Minio {
            endpoint: "minio.local".to_string(),
            use_ssl: true,
            region: None,
        }
        .resolve()
        .unwrap();
        assert_eq!(ssl.url, "https://minio.local");
    }

    #[test]
    fn test_minio_rejects_empty_endpoint() {
        let result = ProviderConfig::Minio {
            endpoint: " / ".to_string(),
            use_ssl: true,
            region: None,
        }
        .resolve();
        assert!(result.is_err());
    }
}
