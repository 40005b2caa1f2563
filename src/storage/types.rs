//! Listing types shared by every object store backend
//!
//! The engine lists in two shapes: the device directories under
//! `{prefix}changes/` (delimiter `/`), and one device's change records past
//! its watermark (`start_after` the last applied sequence key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One listed object; change record keys end in their zero-padded sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// One page of a listing. `prefixes` holds the per-device directories when
/// listing with a delimiter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectList {
    pub objects: Vec<ObjectMetadata>,
    pub prefixes: Vec<String>,
    pub continuation_token: Option<String>,
    pub is_truncated: bool,
}

/// Listing request; keys come back in ascending order
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
    /// Only return keys that sort strictly after this one, so a pull resumes
    /// just past the watermark
    pub start_after: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn with_continuation_token(mut self, token: impl Into<String>) -> Self {
        self.continuation_token = Some(token.into());
        self
    }

    pub fn with_start_after(mut self, key: impl Into<String>) -> Self {
        self.start_after = Some(key.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_builder() {
        let options = ListOptions::new()
            .with_prefix("changes/")
            .with_delimiter("/")
            .with_max_keys(100)
            .with_start_after("changes/a/00000000000000000001.json");

        assert_eq!(options.prefix, Some("changes/".to_string()));
        assert_eq!(options.delimiter, Some("/".to_string()));
        assert_eq!(options.max_keys, Some(100));
        assert_eq!(
            options.start_after,
            Some("changes/a/00000000000000000001.json".to_string())
        );
    }
}
