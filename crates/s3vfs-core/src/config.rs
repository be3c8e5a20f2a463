//! Virtual file system configuration.
//!
//! Provides [`VfsConfig`], the bucket, prefix and client settings for a
//! [`VirtualFileSystem`](crate::vfs::VirtualFileSystem). Values are loaded
//! from `JPYNB_S3_*` environment variables so existing notebook deployments
//! keep working unchanged.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::path::RootPrefix;

/// Default number of versions returned by a single version listing.
pub const DEFAULT_VERSION_PAGE_SIZE: usize = 20;

/// Virtual file system configuration.
///
/// # Examples
///
/// ```
/// use s3vfs_core::config::VfsConfig;
///
/// let config = VfsConfig::default();
/// assert_eq!(config.bucket, "notebooks");
/// assert_eq!(config.dir_keep_file, ".s3keep");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct VfsConfig {
    /// Bucket holding the notebooks.
    #[builder(default = String::from("notebooks"))]
    pub bucket: String,

    /// Optional key prefix inside the bucket.
    #[builder(default)]
    pub prefix: String,

    /// Path delimiter.
    #[builder(default = String::from("/"))]
    pub delimiter: String,

    /// Placeholder object written into every directory.
    #[builder(default = String::from(".s3keep"))]
    pub dir_keep_file: String,

    /// Custom S3 endpoint (MinIO, LocalStack, ...). `None` uses the AWS default.
    #[builder(default)]
    pub endpoint_url: Option<String>,

    /// AWS region.
    #[builder(default = String::from("us-east-1"))]
    pub region_name: String,

    /// Static access key ID. Falls back to the default provider chain when unset.
    #[builder(default)]
    pub access_key_id: Option<String>,

    /// Static secret access key.
    #[builder(default)]
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,

    /// Session token for temporary credentials.
    #[builder(default)]
    #[serde(skip_serializing)]
    pub session_token: Option<String>,

    /// Server-side encryption algorithm (e.g. `AES256`, `aws:kms`).
    #[builder(default)]
    pub sse: Option<String>,

    /// KMS key used when `sse` is `aws:kms`.
    #[builder(default)]
    pub kms_key_id: Option<String>,

    /// Use path-style addressing (required by most S3-compatible servers).
    #[builder(default = false)]
    pub force_path_style: bool,

    /// Maximum number of versions fetched per version listing.
    #[builder(default = DEFAULT_VERSION_PAGE_SIZE)]
    pub version_page_size: usize,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            bucket: String::from("notebooks"),
            prefix: String::new(),
            delimiter: String::from("/"),
            dir_keep_file: String::from(".s3keep"),
            endpoint_url: None,
            region_name: String::from("us-east-1"),
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            sse: None,
            kms_key_id: None,
            force_path_style: false,
            version_page_size: DEFAULT_VERSION_PAGE_SIZE,
            log_level: String::from("info"),
        }
    }
}

impl VfsConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `JPYNB_S3_BUCKET` | `notebooks` |
    /// | `JPYNB_S3_PREFIX` | *(empty)* |
    /// | `JPYNB_S3_DELIMITER` | `/` |
    /// | `JPYNB_S3_DIR_KEEP_FILE` | `.s3keep` |
    /// | `JPYNB_S3_ENDPOINT_URL` | *(unset)* |
    /// | `JPYNB_S3_REGION_NAME` | `us-east-1` |
    /// | `JPYNB_S3_ACCESS_KEY_ID` | *(unset)* |
    /// | `JPYNB_S3_SECRET_ACCESS_KEY` | *(unset)* |
    /// | `JPYNB_S3_SESSION_TOKEN` | *(unset)* |
    /// | `JPYNB_S3_SSE` | *(unset)* |
    /// | `JPYNB_S3_KMS_KEY_ID` | *(unset)* |
    /// | `JPYNB_S3_FORCE_PATH_STYLE` | `false` |
    /// | `JPYNB_S3_VERSION_PAGE_SIZE` | `20` |
    /// | `LOG_LEVEL` | `info` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("JPYNB_S3_BUCKET") {
            config.bucket = v;
        }
        if let Ok(v) = std::env::var("JPYNB_S3_PREFIX") {
            config.prefix = v;
        }
        if let Ok(v) = std::env::var("JPYNB_S3_DELIMITER") {
            if !v.is_empty() {
                config.delimiter = v;
            }
        }
        if let Ok(v) = std::env::var("JPYNB_S3_DIR_KEEP_FILE") {
            if !v.is_empty() {
                config.dir_keep_file = v;
            }
        }
        config.endpoint_url = non_empty_var("JPYNB_S3_ENDPOINT_URL");
        if let Ok(v) = std::env::var("JPYNB_S3_REGION_NAME") {
            config.region_name = v;
        }
        config.access_key_id = non_empty_var("JPYNB_S3_ACCESS_KEY_ID");
        config.secret_access_key = non_empty_var("JPYNB_S3_SECRET_ACCESS_KEY");
        config.session_token = non_empty_var("JPYNB_S3_SESSION_TOKEN");
        config.sse = non_empty_var("JPYNB_S3_SSE");
        config.kms_key_id = non_empty_var("JPYNB_S3_KMS_KEY_ID");
        if let Ok(v) = std::env::var("JPYNB_S3_FORCE_PATH_STYLE") {
            config.force_path_style = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("JPYNB_S3_VERSION_PAGE_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                config.version_page_size = n.max(1);
            }
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// The root prefix (bucket plus optional prefix) every path is joined to.
    #[must_use]
    pub fn root_prefix(&self) -> RootPrefix {
        RootPrefix::new(&self.bucket, &self.prefix, &self.delimiter)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
