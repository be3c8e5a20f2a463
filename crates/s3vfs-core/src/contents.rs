//! Versioned document store.
//!
//! [`VersionedDocumentStore`] is what the editing host talks to. Reads go
//! through the [`VirtualFileSystem`] with this store's [`PinnedVersions`]
//! table. Saves reconcile the version metadata embedded in the document
//! against the key's history before writing:
//!
//! | requested changed | current is latest | outcome |
//! |-------------------|-------------------|---------|
//! | yes | no | pin `requested`, then save |
//! | yes | yes | latest-path save, pin `requested` |
//! | no | no | [`VfsError::OverwriteRejected`] |
//! | no | yes | latest-path save, unpin |
//!
//! A latest-path save may also create a release: the new version is tagged
//! with the requested release name and a per-document counter.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::document::{self, SaveDecision, VersionMetadata};
use crate::error::{VfsError, VfsResult};
use crate::pins::PinnedVersions;
use crate::vfs::{FileContent, VirtualFileSystem};

/// Host integration points run on every document save.
pub trait DocumentHooks: Send + Sync + std::fmt::Debug {
    /// Mark the document as trusted before it is written.
    fn check_and_sign(&self, path: &str, document: &Value) {
        let _ = (path, document);
    }

    /// Validate the saved document. A returned message is reported to the
    /// host; the document is saved regardless.
    fn validate(&self, path: &str, document: &Value) -> Option<String>;
}

/// Structural notebook validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotebookValidator;

impl DocumentHooks for NotebookValidator {
    fn validate(&self, path: &str, document: &Value) -> Option<String> {
        let Some(root) = document.as_object() else {
            return Some(format!("Notebook validation failed for {path}: not a JSON object"));
        };

        let mut problems = Vec::new();
        if !root.get("cells").is_some_and(Value::is_array) {
            problems.push("'cells' must be an array");
        }
        if !root.get("metadata").is_some_and(Value::is_object) {
            problems.push("'metadata' must be an object");
        }
        if !root.get("nbformat").is_some_and(Value::is_u64) {
            problems.push("'nbformat' must be an integer");
        }
        if !root.get("nbformat_minor").is_some_and(Value::is_u64) {
            problems.push("'nbformat_minor' must be an integer");
        }

        if problems.is_empty() {
            None
        } else {
            Some(format!(
                "Notebook validation failed for {path}: {}",
                problems.join("; ")
            ))
        }
    }
}

/// Result of a document save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Reconciliation outcome that governed the save.
    pub decision: SaveDecision,
    /// Version created by the write, when the store reports one.
    pub version_id: Option<String>,
    /// Release counter attached to the new version, if a release was created.
    pub release_tag: Option<u64>,
    /// Validation message, if the document did not validate.
    pub message: Option<String>,
}

/// Document store layering save reconciliation over a [`VirtualFileSystem`].
#[derive(Debug)]
pub struct VersionedDocumentStore {
    vfs: VirtualFileSystem,
    pins: PinnedVersions,
    hooks: Arc<dyn DocumentHooks>,
}

impl VersionedDocumentStore {
    /// Create a store with the default [`NotebookValidator`] hooks.
    #[must_use]
    pub fn new(vfs: VirtualFileSystem) -> Self {
        Self::with_hooks(vfs, Arc::new(NotebookValidator))
    }

    /// Create a store with custom hooks.
    #[must_use]
    pub fn with_hooks(vfs: VirtualFileSystem, hooks: Arc<dyn DocumentHooks>) -> Self {
        Self {
            vfs,
            pins: PinnedVersions::new(),
            hooks,
        }
    }

    /// The underlying file system.
    #[must_use]
    pub fn vfs(&self) -> &VirtualFileSystem {
        &self.vfs
    }

    /// The pinned-version table.
    #[must_use]
    pub fn pins(&self) -> &PinnedVersions {
        &self.pins
    }

    /// Read a file with the current pins.
    pub async fn open(&self, path: &str, format: Option<&str>) -> VfsResult<FileContent> {
        self.vfs.read(path, format, &self.pins).await
    }

    /// Pin `version_id` for `path`, then read it.
    pub async fn open_version(&self, path: &str, version_id: &str) -> VfsResult<FileContent> {
        self.pins.set(&self.vfs.logical_path(path), Some(version_id));
        self.open(path, None).await
    }

    /// Stop honouring a pinned version for `path`.
    pub fn unpin(&self, path: &str) {
        self.pins.unpin(&self.vfs.logical_path(path));
    }

    /// Save a document, reconciling its version metadata first.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::InvalidDocument`] when the document is not a JSON
    /// object or its release counter cannot be advanced, and
    /// [`VfsError::OverwriteRejected`] when the document was read from an
    /// older version and no other version was requested. Nothing is written
    /// in those cases.
    ///
    /// A release is tagged after the new revision is written. If tagging
    /// fails the error is returned, but the revision stays stored untagged and
    /// already carries the advanced `s3_latest_release_tag`, so the next
    /// release skips that counter value.
    pub async fn save(&self, path: &str, mut document: Value) -> VfsResult<SaveOutcome> {
        let path = self.vfs.logical_path(path);
        if !document.is_object() {
            return Err(VfsError::InvalidDocument {
                path: self.vfs.root().key(&path),
                message: "document root is not a JSON object".to_owned(),
            });
        }
        let metadata = VersionMetadata::from_document(&document);
        let decision = SaveDecision::for_metadata(metadata.as_ref());
        debug!(path = %path, ?decision, "reconciled save");

        let mut release = None;
        match &decision {
            SaveDecision::Plain => {}
            SaveDecision::Reject => {
                warn!(path = %path, "rejected save over an older version");
                return Err(VfsError::OverwriteRejected {
                    path: self.vfs.root().key(&path),
                });
            }
            SaveDecision::Pin { requested } => {
                self.pins.set(&path, requested.as_deref());
            }
            SaveDecision::LatestPath { version_changed } => {
                let meta = metadata.unwrap_or_default();
                if let Some(name) = meta.release_request.clone() {
                    let tag = meta
                        .next_release_tag()
                        .map_err(|e| VfsError::InvalidDocument {
                            path: self.vfs.root().key(&path),
                            message: e.to_string(),
                        })?;
                    document::record_release(&mut document, tag);
                    release = Some((name, tag));
                }
                if *version_changed {
                    self.pins.set(&path, meta.requested.as_deref());
                } else {
                    self.pins.unpin(&path);
                }
            }
        }

        document::strip_derived(&mut document);
        self.hooks.check_and_sign(&path, &document);
        let serialized = serde_json::to_string(&document).map_err(anyhow::Error::from)?;
        let put = self.vfs.write_document(&path, &serialized).await?;

        let mut version_id = put.version_id;
        let release_tag = match release {
            Some((name, tag)) => {
                let target = self.tag_release(&path, version_id.take(), &name, tag).await?;
                version_id = Some(target);
                Some(tag)
            }
            None => None,
        };

        let message = self.hooks.validate(&path, &document);
        if let Some(message) = &message {
            warn!(path = %path, "{message}");
        }

        Ok(SaveOutcome {
            decision,
            version_id,
            release_tag,
            message,
        })
    }

    /// Tag the just-written revision as release `tag`. Returns its version ID.
    async fn tag_release(
        &self,
        path: &str,
        written: Option<String>,
        name: &str,
        tag: u64,
    ) -> VfsResult<String> {
        let target = match written {
            Some(id) => id,
            None => self.vfs.get_latest_version(path).await?.version_id,
        };
        if let Err(err) = self
            .vfs
            .tag_version(path, &target, document::release_tags(name, tag))
            .await
        {
            error!(
                path = %path,
                release = %name,
                tag,
                version_id = %target,
                error = %err,
                "revision written but release tag not recorded",
            );
            return Err(err);
        }
        info!(path = %path, release = %name, tag, version_id = %target, "created release");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;
    use crate::config::VfsConfig;
    use crate::document::{RELEASE_COUNTER_TAG, RELEASE_NAME_TAG};
    use crate::error::{StoreError, StoreResult};
    use crate::store::{InMemoryStore, ObjectInfo, ObjectStore, ObjectTag, PutOutcome, StoredVersion};

    const PATH: &str = "work/analysis.ipynb";

    fn docs() -> (VersionedDocumentStore, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let config = VfsConfig::builder().bucket("nb".into()).build();
        let vfs = VirtualFileSystem::new(store.clone(), &config);
        (VersionedDocumentStore::new(vfs), store)
    }

    fn notebook(source: &str) -> Value {
        json!({
            "cells": [{"cell_type": "code", "source": source, "metadata": {}, "outputs": []}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        })
    }

    async fn open_doc(docs: &VersionedDocumentStore) -> Value {
        let content = docs.open(PATH, None).await.unwrap();
        serde_json::from_str(&content.content).unwrap()
    }

    fn source(doc: &Value) -> &str {
        doc["cells"][0]["source"].as_str().unwrap()
    }

    async fn stored(store: &InMemoryStore) -> Value {
        let bytes = store.get_object("nb/work/analysis.ipynb", None).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Save two plain revisions; returns their version IDs, oldest first.
    async fn two_revisions(docs: &VersionedDocumentStore) -> (String, String) {
        let first = docs.save(PATH, notebook("one")).await.unwrap();
        let second = docs.save(PATH, notebook("two")).await.unwrap();
        (first.version_id.unwrap(), second.version_id.unwrap())
    }

    #[tokio::test]
    async fn test_should_save_plain_document() {
        let (docs, store) = docs();
        let outcome = docs.save(PATH, notebook("x = 1")).await.unwrap();

        assert_eq!(outcome.decision, SaveDecision::Plain);
        assert!(outcome.version_id.is_some());
        assert!(outcome.message.is_none());
        assert_eq!(source(&stored(&store).await), "x = 1");
    }

    #[tokio::test]
    async fn test_should_not_persist_version_history() {
        let (docs, store) = docs();
        two_revisions(&docs).await;

        let doc = open_doc(&docs).await;
        assert!(doc["metadata"]["s3_versions"].is_array());
        docs.save(PATH, doc).await.unwrap();

        let persisted = stored(&store).await;
        assert!(persisted["metadata"].get("s3_versions").is_none());
        assert!(persisted["metadata"].get("s3_latest_version").is_some());
    }

    #[tokio::test]
    async fn test_should_save_edit_of_latest_version() {
        let (docs, _) = docs();
        two_revisions(&docs).await;

        let mut doc = open_doc(&docs).await;
        doc["cells"][0]["source"] = json!("three");
        let outcome = docs.save(PATH, doc).await.unwrap();

        // A latest read carries no requested version, so the save clears it.
        assert_eq!(
            outcome.decision,
            SaveDecision::LatestPath {
                version_changed: true
            }
        );
        assert_eq!(source(&open_doc(&docs).await), "three");
        assert!(docs.pins().is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_overwrite_of_older_version() {
        let (docs, store) = docs();
        let (first, _) = two_revisions(&docs).await;

        // Edit the old version without asking for another one.
        let content = docs.open_version(PATH, &first).await.unwrap();
        let mut doc: Value = serde_json::from_str(&content.content).unwrap();
        doc["cells"][0]["source"] = json!("one, edited");

        let err = docs.save(PATH, doc).await.unwrap_err();
        assert!(matches!(err, VfsError::OverwriteRejected { ref path } if path == "nb/work/analysis.ipynb"));
        assert_eq!(err.status_code(), 409);
        assert_eq!(source(&stored(&store).await), "two");
    }

    #[tokio::test]
    async fn test_should_pin_requested_version_from_latest() {
        let (docs, _) = docs();
        let (first, _) = two_revisions(&docs).await;

        let mut doc = open_doc(&docs).await;
        doc["metadata"]["s3_requested_version"] = json!(first);
        let outcome = docs.save(PATH, doc).await.unwrap();
        let new_latest = outcome.version_id.clone().unwrap();

        assert_eq!(
            outcome.decision,
            SaveDecision::LatestPath {
                version_changed: true
            }
        );
        assert_eq!(docs.pins().get(PATH), Some(first.clone()));

        let reopened = open_doc(&docs).await;
        assert_eq!(reopened["metadata"]["s3_requested_version"], first.as_str());
        assert_eq!(reopened["metadata"]["s3_latest_version"], new_latest.as_str());
        assert_eq!(source(&reopened), "one");
    }

    #[tokio::test]
    async fn test_should_pin_and_save_when_switching_from_older_version() {
        let (docs, store) = docs();
        let (first, second) = two_revisions(&docs).await;

        let content = docs.open_version(PATH, &first).await.unwrap();
        let mut doc: Value = serde_json::from_str(&content.content).unwrap();
        doc["metadata"]["s3_requested_version"] = json!(second);
        let outcome = docs.save(PATH, doc).await.unwrap();

        assert_eq!(
            outcome.decision,
            SaveDecision::Pin {
                requested: Some(second.clone())
            }
        );
        assert_eq!(docs.pins().get(PATH), Some(second));
        // The old content was written back as the new head.
        assert_eq!(source(&stored(&store).await), "one");
    }

    #[tokio::test]
    async fn test_should_tag_releases_with_increasing_counter() {
        let (docs, _) = docs();
        two_revisions(&docs).await;

        let mut doc = open_doc(&docs).await;
        doc["metadata"]["s3_create_release"] = json!("first release");
        let outcome = docs.save(PATH, doc).await.unwrap();
        assert_eq!(outcome.release_tag, Some(0));

        let latest = docs.vfs().get_latest_version(PATH).await.unwrap();
        assert_eq!(Some(latest.version_id.clone()), outcome.version_id);
        assert_eq!(latest.release_name(), Some("first release"));
        assert!(
            latest
                .tags
                .contains(&ObjectTag::new(RELEASE_COUNTER_TAG, "0"))
        );

        let mut doc = open_doc(&docs).await;
        assert_eq!(doc["metadata"]["s3_latest_release_tag"], 0);
        assert!(doc["metadata"].get("s3_create_release").is_none());
        doc["metadata"]["s3_create_release"] = json!("second release");
        let outcome = docs.save(PATH, doc).await.unwrap();
        assert_eq!(outcome.release_tag, Some(1));

        let versions = docs.vfs().get_versions(PATH).await.unwrap();
        let names: Vec<_> = versions.iter().filter_map(|v| v.release_name()).collect();
        assert_eq!(names, vec!["second release", "first release"]);
        assert!(
            versions[0]
                .tags
                .contains(&ObjectTag::new(RELEASE_NAME_TAG, "second release"))
        );
    }

    #[tokio::test]
    async fn test_should_tag_release_on_unversioned_bucket() {
        let store = Arc::new(InMemoryStore::unversioned());
        let vfs = VirtualFileSystem::new(store, &VfsConfig::default());
        let docs = VersionedDocumentStore::new(vfs);
        docs.save(PATH, notebook("one")).await.unwrap();

        let mut doc = open_doc(&docs).await;
        doc["metadata"]["s3_create_release"] = json!("only");
        let outcome = docs.save(PATH, doc).await.unwrap();

        assert_eq!(outcome.release_tag, Some(0));
        let latest = docs.vfs().get_latest_version(PATH).await.unwrap();
        assert_eq!(latest.release_name(), Some("only"));
    }

    #[tokio::test]
    async fn test_should_report_validation_message_but_save() {
        let (docs, store) = docs();
        let outcome = docs
            .save(PATH, json!({"cells": "nope", "metadata": {}}))
            .await
            .unwrap();

        let message = outcome.message.unwrap();
        assert!(message.contains("'cells' must be an array"));
        assert!(message.contains("'nbformat' must be an integer"));
        assert_eq!(stored(&store).await["cells"], "nope");
    }

    #[tokio::test]
    async fn test_should_refuse_non_object_document() {
        let (docs, store) = docs();
        let err = docs.save(PATH, json!([1, 2, 3])).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_should_open_version_and_unpin() {
        let (docs, _) = docs();
        let (first, _) = two_revisions(&docs).await;

        let content = docs.open_version(PATH, &first).await.unwrap();
        let doc: Value = serde_json::from_str(&content.content).unwrap();
        assert_eq!(source(&doc), "one");
        assert_eq!(docs.pins().len(), 1);

        docs.unpin(PATH);
        assert_eq!(source(&open_doc(&docs).await), "two");
    }

    #[tokio::test]
    async fn test_should_unpin_after_saving_pinned_latest() {
        let (docs, _) = docs();
        let (_, second) = two_revisions(&docs).await;

        let content = docs.open_version(PATH, &second).await.unwrap();
        let doc: Value = serde_json::from_str(&content.content).unwrap();
        let outcome = docs.save(PATH, doc).await.unwrap();

        assert_eq!(
            outcome.decision,
            SaveDecision::LatestPath {
                version_changed: false
            }
        );
        assert!(docs.pins().get(PATH).is_none());
    }

    #[tokio::test]
    async fn test_should_refuse_release_when_counter_cannot_advance() {
        let (docs, store) = docs();
        docs.save(PATH, notebook("one")).await.unwrap();

        let mut doc = open_doc(&docs).await;
        doc["metadata"]["s3_latest_release_tag"] = json!(u64::MAX);
        doc["metadata"]["s3_create_release"] = json!("too many");
        docs.pins().set(PATH, Some("kept"));
        let err = docs.save(PATH, doc).await.unwrap_err();

        assert!(matches!(err, VfsError::InvalidDocument { .. }));
        assert_eq!(docs.pins().get(PATH).as_deref(), Some("kept"));
        assert_eq!(docs.vfs().get_versions(PATH).await.unwrap().len(), 1);
        assert!(stored(&store).await["metadata"].get("s3_latest_release_tag").is_none());
    }

    /// Delegates to [`InMemoryStore`] but refuses to tag.
    #[derive(Debug, Default)]
    struct UntaggableStore {
        inner: InMemoryStore,
    }

    #[async_trait::async_trait]
    impl ObjectStore for UntaggableStore {
        async fn list_directory(&self, prefix: &str, delimiter: &str) -> StoreResult<Vec<String>> {
            self.inner.list_directory(prefix, delimiter).await
        }
        async fn list_keys(&self, prefix: &str, limit: Option<usize>) -> StoreResult<Vec<String>> {
            self.inner.list_keys(prefix, limit).await
        }
        async fn get_object(&self, key: &str, version_id: Option<&str>) -> StoreResult<Bytes> {
            self.inner.get_object(key, version_id).await
        }
        async fn put_object(&self, key: &str, body: Bytes) -> StoreResult<PutOutcome> {
            self.inner.put_object(key, body).await
        }
        async fn copy_object(&self, src: &str, dst: &str) -> StoreResult<()> {
            self.inner.copy_object(src, dst).await
        }
        async fn delete_object(&self, key: &str) -> StoreResult<()> {
            self.inner.delete_object(key).await
        }
        async fn delete_prefix(&self, prefix: &str) -> StoreResult<usize> {
            self.inner.delete_prefix(prefix).await
        }
        async fn head_object(&self, key: &str) -> StoreResult<ObjectInfo> {
            self.inner.head_object(key).await
        }
        async fn list_object_versions(&self, key: &str, max_keys: usize) -> StoreResult<Vec<StoredVersion>> {
            self.inner.list_object_versions(key, max_keys).await
        }
        async fn get_object_tagging(&self, key: &str, version_id: &str) -> StoreResult<Vec<ObjectTag>> {
            self.inner.get_object_tagging(key, version_id).await
        }
        async fn put_object_tagging(&self, key: &str, _: &str, _: Vec<ObjectTag>) -> StoreResult<()> {
            Err(StoreError::AccessDenied {
                key: key.to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn test_should_report_release_tagging_failure_after_write() {
        let store = Arc::new(UntaggableStore::default());
        let config = VfsConfig::builder().bucket("nb".into()).build();
        let docs = VersionedDocumentStore::new(VirtualFileSystem::new(store.clone(), &config));
        docs.save(PATH, notebook("one")).await.unwrap();

        let mut doc = open_doc(&docs).await;
        doc["metadata"]["s3_create_release"] = json!("blocked");
        let err = docs.save(PATH, doc).await.unwrap_err();
        assert!(err.is_access_denied());

        // The revision is stored, untagged, with the advanced counter.
        let latest = docs.vfs().get_latest_version(PATH).await.unwrap();
        assert!(latest.tags.is_empty());
        assert_eq!(docs.vfs().get_versions(PATH).await.unwrap().len(), 2);
        let bytes = store.get_object("nb/work/analysis.ipynb", None).await.unwrap();
        let persisted: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(persisted["metadata"]["s3_latest_release_tag"], 0);
    }

    #[derive(Debug, Default)]
    struct RecordingHooks {
        signed: parking_lot::Mutex<Vec<String>>,
    }

    impl DocumentHooks for RecordingHooks {
        fn check_and_sign(&self, path: &str, _: &Value) {
            self.signed.lock().push(path.to_owned());
        }

        fn validate(&self, _: &str, _: &Value) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn test_should_sign_every_saved_document() {
        let store = Arc::new(InMemoryStore::new());
        let vfs = VirtualFileSystem::new(store, &VfsConfig::default());
        let hooks = Arc::new(RecordingHooks::default());
        let docs = VersionedDocumentStore::with_hooks(vfs, hooks.clone());

        assert_ok!(docs.save("a.ipynb", notebook("a")).await);
        assert_ok!(docs.save("/b.ipynb", notebook("b")).await);
        assert_eq!(*hooks.signed.lock(), vec!["a.ipynb", "b.ipynb"]);
    }
}
