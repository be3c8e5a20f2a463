//! In-memory object store with versioning support.
//!
//! Keys map to a version list kept newest first, so the first entry is always
//! the latest one. Deleting a key in a versioned store pushes a delete marker,
//! which hides the key from listings and heads while older versions stay
//! readable by ID. Uses a `BTreeMap` so prefix listings come out sorted.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{NULL_VERSION_ID, ObjectInfo, ObjectStore, ObjectTag, PutOutcome, StoredVersion};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredObject {
    version_id: String,
    data: Bytes,
    last_modified: DateTime<Utc>,
    tags: Vec<ObjectTag>,
}

#[derive(Debug, Clone)]
enum VersionEntry {
    Object(StoredObject),
    DeleteMarker { version_id: String },
}

impl VersionEntry {
    fn version_id(&self) -> &str {
        match self {
            Self::Object(obj) => &obj.version_id,
            Self::DeleteMarker { version_id } => version_id,
        }
    }

    fn as_object(&self) -> Option<&StoredObject> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::DeleteMarker { .. } => None,
        }
    }

    fn as_object_mut(&mut self) -> Option<&mut StoredObject> {
        match self {
            Self::Object(obj) => Some(obj),
            Self::DeleteMarker { .. } => None,
        }
    }
}

/// Versioned in-memory [`ObjectStore`].
///
/// # Examples
///
/// ```
/// use s3vfs_core::store::{InMemoryStore, ObjectStore};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new();
/// store.put_object("nb/a.txt", "v1".into()).await.unwrap();
/// store.put_object("nb/a.txt", "v2".into()).await.unwrap();
/// let versions = store.list_object_versions("nb/a.txt", 20).await.unwrap();
/// assert_eq!(versions.len(), 2);
/// assert!(versions[0].is_latest);
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    versioned: bool,
    objects: RwLock<BTreeMap<String, Vec<VersionEntry>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store with versioning enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versioned: true,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create an empty store with versioning disabled. Every write replaces
    /// the single `null` version of its key.
    #[must_use]
    pub fn unversioned() -> Self {
        Self {
            versioned: false,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether versioning is enabled.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Number of keys whose latest entry is a live object.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects
            .read()
            .values()
            .filter(|versions| versions.first().is_some_and(|v| v.as_object().is_some()))
            .count()
    }

    /// Whether no live objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest<'a>(
        objects: &'a BTreeMap<String, Vec<VersionEntry>>,
        key: &str,
    ) -> Option<&'a StoredObject> {
        objects.get(key)?.first()?.as_object()
    }

    fn live_keys(objects: &BTreeMap<String, Vec<VersionEntry>>, prefix: &str) -> Vec<String> {
        objects
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, versions)| versions.first().is_some_and(|v| v.as_object().is_some()))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn insert(&self, key: &str, data: Bytes) -> String {
        let version_id = if self.versioned {
            Uuid::new_v4().to_string()
        } else {
            NULL_VERSION_ID.to_owned()
        };
        let object = VersionEntry::Object(StoredObject {
            version_id: version_id.clone(),
            data,
            last_modified: Utc::now(),
            tags: Vec::new(),
        });

        let mut objects = self.objects.write();
        let versions = objects.entry(key.to_owned()).or_default();
        if self.versioned {
            versions.insert(0, object);
        } else {
            *versions = vec![object];
        }
        debug!(key, version = %version_id, "stored object");
        version_id
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn list_directory(&self, prefix: &str, delimiter: &str) -> StoreResult<Vec<String>> {
        let objects = self.objects.read();
        let mut entries = Vec::new();
        let mut seen_prefixes = HashSet::new();

        for key in Self::live_keys(&objects, prefix) {
            let after_prefix = &key[prefix.len()..];
            match after_prefix.find(delimiter) {
                Some(pos) => {
                    let common = format!("{prefix}{}", &after_prefix[..pos]);
                    if seen_prefixes.insert(common.clone()) {
                        entries.push(common);
                    }
                }
                None => entries.push(key),
            }
        }
        Ok(entries)
    }

    async fn list_keys(&self, prefix: &str, limit: Option<usize>) -> StoreResult<Vec<String>> {
        let mut keys = Self::live_keys(&self.objects.read(), prefix);
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn get_object(&self, key: &str, version_id: Option<&str>) -> StoreResult<Bytes> {
        let objects = self.objects.read();
        match version_id {
            None => Self::latest(&objects, key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_owned(),
                }),
            Some(version_id) => objects
                .get(key)
                .and_then(|versions| versions.iter().find(|v| v.version_id() == version_id))
                .and_then(VersionEntry::as_object)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| StoreError::NoSuchVersion {
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                }),
        }
    }

    async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<PutOutcome> {
        let version_id = self.insert(key, body);
        Ok(PutOutcome {
            version_id: self.versioned.then_some(version_id),
        })
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()> {
        let data = {
            let objects = self.objects.read();
            Self::latest(&objects, src)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| StoreError::NotFound {
                    key: src.to_owned(),
                })?
        };
        self.insert(dst, data);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        let mut objects = self.objects.write();
        if self.versioned {
            let version_id = Uuid::new_v4().to_string();
            debug!(key, version_id = %version_id, "inserted delete marker");
            objects
                .entry(key.to_owned())
                .or_default()
                .insert(0, VersionEntry::DeleteMarker { version_id });
        } else {
            objects.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let keys = Self::live_keys(&self.objects.read(), prefix);
        for key in &keys {
            self.delete_object(key).await?;
        }
        Ok(keys.len())
    }

    async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
        let objects = self.objects.read();
        Self::latest(&objects, key)
            .map(|obj| ObjectInfo {
                key: key.to_owned(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_owned(),
            })
    }

    async fn list_object_versions(
        &self,
        key: &str,
        max_keys: usize,
    ) -> StoreResult<Vec<StoredVersion>> {
        let objects = self.objects.read();
        let Some(versions) = objects.get(key) else {
            return Ok(Vec::new());
        };
        Ok(versions
            .iter()
            .enumerate()
            .filter_map(|(idx, entry)| {
                entry.as_object().map(|obj| StoredVersion {
                    version_id: obj.version_id.clone(),
                    last_modified: obj.last_modified,
                    is_latest: idx == 0,
                })
            })
            .take(max_keys)
            .collect())
    }

    async fn get_object_tagging(
        &self,
        key: &str,
        version_id: &str,
    ) -> StoreResult<Vec<ObjectTag>> {
        let objects = self.objects.read();
        objects
            .get(key)
            .and_then(|versions| versions.iter().find(|v| v.version_id() == version_id))
            .and_then(VersionEntry::as_object)
            .map(|obj| obj.tags.clone())
            .ok_or_else(|| StoreError::NoSuchVersion {
                key: key.to_owned(),
                version_id: version_id.to_owned(),
            })
    }

    async fn put_object_tagging(
        &self,
        key: &str,
        version_id: &str,
        tags: Vec<ObjectTag>,
    ) -> StoreResult<()> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(key)
            .and_then(|versions| versions.iter_mut().find(|v| v.version_id() == version_id))
            .and_then(VersionEntry::as_object_mut)
            .ok_or_else(|| StoreError::NoSuchVersion {
                key: key.to_owned(),
                version_id: version_id.to_owned(),
            })?;
        debug!(key, version_id, tags = tags.len(), "put object tagging");
        object.tags = tags;
        Ok(())
    }
}
