//! Object-store abstraction.
//!
//! The virtual file system talks to storage only through the [`ObjectStore`]
//! trait. Keys are full keys in `<bucket>/<key>` form, exactly what
//! [`RootPrefix`](crate::path::RootPrefix) produces.
//!
//! - [`S3Store`] -- AWS SDK backend for S3 and S3-compatible servers
//! - [`InMemoryStore`] -- versioned in-memory backend

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

pub use memory::InMemoryStore;
pub use s3::S3Store;

/// Version ID reported for objects written while versioning is off.
pub const NULL_VERSION_ID: &str = "null";

/// A key/value tag attached to an object version.
///
/// Serialized with `Key` / `Value` field names, the shape S3 returns in a
/// `TagSet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectTag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl ObjectTag {
    /// Create a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Head information for a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time of the latest version.
    pub last_modified: DateTime<Utc>,
}

/// One entry of a version listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    /// Version ID.
    pub version_id: String,
    /// Time the version was written.
    pub last_modified: DateTime<Utc>,
    /// Whether this is the current version of the key.
    pub is_latest: bool,
}

/// Result of a put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOutcome {
    /// Version ID assigned by the store, when versioning is enabled.
    pub version_id: Option<String>,
}

/// Flat key-value store with native per-key version history.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// List the immediate children of `prefix` (which ends with `delimiter`).
    ///
    /// Returns object keys and sub-prefixes (without their trailing
    /// delimiter). Always served fresh.
    async fn list_directory(&self, prefix: &str, delimiter: &str) -> StoreResult<Vec<String>>;

    /// List every key starting with `prefix`, stopping after `limit` keys.
    async fn list_keys(&self, prefix: &str, limit: Option<usize>) -> StoreResult<Vec<String>>;

    /// Fetch the latest version, or the given version, of a key.
    async fn get_object(&self, key: &str, version_id: Option<&str>) -> StoreResult<Bytes>;

    /// Store bytes at a key, creating a new version.
    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<PutOutcome>;

    /// Server-side copy of the latest version of `src` to `dst`.
    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()>;

    /// Delete a key.
    async fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Delete every key starting with `prefix`. Returns the number deleted.
    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Head a key. Missing keys yield [`StoreError::NotFound`](crate::error::StoreError::NotFound).
    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo>;

    /// Versions of exactly `key`, newest first, at most `max_keys` entries.
    async fn list_object_versions(
        &self,
        key: &str,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredVersion>>;

    /// Tags of one version of a key.
    async fn get_object_tagging(&self, key: &str, version_id: &str)
    -> StoreResult<Vec<ObjectTag>>;

    /// Replace the tags of one version of a key.
    async fn put_object_tagging(
        &self,
        key: &str,
        version_id: &str,
        tags: Vec<ObjectTag>,
    ) -> StoreResult<()>;
}
