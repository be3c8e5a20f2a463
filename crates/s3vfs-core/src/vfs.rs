//! Virtual file system over a versioned object store.
//!
//! Maps hierarchical path operations onto flat keys:
//!
//! - directories exist only as key prefixes; an empty directory is kept alive
//!   by a zero-byte marker object (`.s3keep` by default) which is never
//!   reported as a file
//! - reads of notebook documents honour a pinned version from a
//!   [`PinnedVersions`] table and decorate the document metadata with the
//!   version history
//! - copy, move and remove recurse over directory prefixes and are not
//!   transactional; a failure part-way leaves the destination partially
//!   populated

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::VfsConfig;
use crate::document::{self, VersionInfo, VersionRecord};
use crate::error::{StoreError, VfsError, VfsResult};
use crate::path::RootPrefix;
use crate::pins::PinnedVersions;
use crate::store::{ObjectStore, ObjectTag, PutOutcome};

/// Policy logged when the startup check is denied access.
const SAMPLE_ACCESS_POLICY: &str = r#"{
    "Sid": "S3contentsKeepFile",
    "Action": [
        "s3:*"
    ],
    "Effect": "Allow",
    "Resource": [
        "arn:aws:s3:::{resource}"
    ]
}"#;

// ---------------------------------------------------------------------------
// Content formats
// ---------------------------------------------------------------------------

/// Encoding of file content exchanged with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// UTF-8 text.
    Text,
    /// Standard base64 of the raw bytes.
    Base64,
}

impl ContentFormat {
    /// Wire name of the format.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Base64 => "base64",
        }
    }
}

impl fmt::Display for ContentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentFormat {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "base64" => Ok(Self::Base64),
            _ => Err(VfsError::BadFormat {
                message: "Must specify format of file contents as 'text' or 'base64'".to_owned(),
            }),
        }
    }
}

/// File content returned by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    /// Content, encoded per `format`.
    pub content: String,
    /// Format the content was returned in.
    pub format: ContentFormat,
}

/// Result of a stat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    /// Last modification time; `None` when the target does not exist.
    pub modified: Option<DateTime<Utc>>,
}

/// Result of a version-resolving read.
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    /// The requested (pinned or latest) revision was returned.
    Resolved {
        /// Raw, possibly decorated, content.
        content: Bytes,
        /// Version state for notebook documents.
        version: Option<VersionInfo>,
    },
    /// The pinned revision could not be used; the latest was returned.
    FallbackToLatest {
        /// Raw, possibly decorated, content of the latest revision.
        content: Bytes,
        /// Version state for notebook documents.
        version: Option<VersionInfo>,
        /// Why the pinned revision was abandoned.
        reason: String,
    },
}

impl ReadOutcome {
    /// Content of the read.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        match self {
            Self::Resolved { content, .. } | Self::FallbackToLatest { content, .. } => content,
        }
    }

    /// Version state of the read.
    #[must_use]
    pub fn version(&self) -> Option<&VersionInfo> {
        match self {
            Self::Resolved { version, .. } | Self::FallbackToLatest { version, .. } => {
                version.as_ref()
            }
        }
    }

    /// Whether the read fell back to the latest revision.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::FallbackToLatest { .. })
    }

    /// Consume the outcome, returning the content.
    #[must_use]
    pub fn into_content(self) -> Bytes {
        match self {
            Self::Resolved { content, .. } | Self::FallbackToLatest { content, .. } => content,
        }
    }
}

// ---------------------------------------------------------------------------
// VirtualFileSystem
// ---------------------------------------------------------------------------

/// Hierarchical view of a bucket (and optional prefix).
#[derive(Debug, Clone)]
pub struct VirtualFileSystem {
    store: Arc<dyn ObjectStore>,
    root: RootPrefix,
    dir_keep_file: String,
    version_page_size: usize,
}

impl VirtualFileSystem {
    /// Create a file system over `store` rooted per `config`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, config: &VfsConfig) -> Self {
        Self {
            store,
            root: config.root_prefix(),
            dir_keep_file: config.dir_keep_file.clone(),
            version_page_size: config.version_page_size.max(1),
        }
    }

    /// The root prefix every path is joined to.
    #[must_use]
    pub fn root(&self) -> &RootPrefix {
        &self.root
    }

    /// The underlying object store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Name of the directory marker object.
    #[must_use]
    pub fn dir_keep_file(&self) -> &str {
        &self.dir_keep_file
    }

    /// Startup check: create the root marker, list and stat the root.
    ///
    /// An access-denied failure is logged together with a sample policy that
    /// would grant the missing permission, then returned.
    pub async fn init(&self) -> VfsResult<()> {
        let result = self.init_root().await;
        if let Err(err) = &result {
            if err.is_access_denied() {
                let resource = self.root.full_key(&[self.dir_keep_file.as_str()]);
                let policy = SAMPLE_ACCESS_POLICY.replace("{resource}", &resource);
                error!(
                    "AccessDenied error while creating initial S3 objects. Create an IAM policy like:\n{policy}"
                );
            }
        }
        result
    }

    async fn init_root(&self) -> VfsResult<()> {
        self.make_directory("").await?;
        self.list("").await?;
        self.is_directory("").await?;
        Ok(())
    }

    /// Immediate children of a directory, as logical paths. Includes directory
    /// markers and sub-directories.
    pub async fn list(&self, path: &str) -> VfsResult<Vec<String>> {
        let prefix = self.root.dir_prefix(path);
        debug!(prefix = %prefix, "listing directory");
        let entries = self
            .store
            .list_directory(&prefix, self.root.delimiter())
            .await?;
        Ok(self.root.strip_root_prefixes(entries))
    }

    /// Whether a real (non-marker) object exists at the path.
    pub async fn is_file(&self, path: &str) -> VfsResult<bool> {
        let path = self.logical_path(path);
        if path.is_empty() || self.is_marker(&path) {
            return Ok(false);
        }
        let key = self.root.key(&path);
        let is_file = match self.store.head_object(&key).await {
            Ok(_) => true,
            Err(StoreError::NotFound { .. }) => false,
            Err(err) => return Err(err.into()),
        };
        debug!(key = %key, is_file, "checked file");
        Ok(is_file)
    }

    /// Whether any object lives under the path's directory prefix.
    pub async fn is_directory(&self, path: &str) -> VfsResult<bool> {
        let prefix = self.root.dir_prefix(path);
        let is_dir = !self.store.list_keys(&prefix, Some(1)).await?.is_empty();
        debug!(prefix = %prefix, is_dir, "checked directory");
        Ok(is_dir)
    }

    /// Modification time of a file, or of a directory's marker.
    ///
    /// A missing target is not an error; it yields `modified: None`.
    pub async fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let key = if self.is_directory(path).await? {
            self.marker_key(path)
        } else {
            self.root.key(path)
        };
        match self.store.head_object(&key).await {
            Ok(info) => Ok(FileStat {
                modified: Some(info.last_modified),
            }),
            Err(StoreError::NotFound { .. }) => Ok(FileStat::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a file, honouring the pin for its path.
    ///
    /// `format` is the host's requested format: `None` or `"text"` try UTF-8
    /// first; anything else returns base64. When the pinned revision cannot
    /// be used the whole pin table is cleared.
    pub async fn read(
        &self,
        path: &str,
        format: Option<&str>,
        pins: &PinnedVersions,
    ) -> VfsResult<FileContent> {
        let path = self.logical_path(path);
        let pinned = pins.get(&path);
        let outcome = self.read_resolved(&path, pinned.as_deref()).await?;
        if let ReadOutcome::FallbackToLatest { reason, .. } = &outcome {
            warn!(path = %path, reason = %reason, "pinned version unavailable, clearing pins");
            pins.clear();
        }
        self.negotiate_format(&path, outcome.into_content(), format)
    }

    /// Fetch a file, resolving which revision to return.
    ///
    /// A `pinned` version is only honoured for notebook documents. Any failure
    /// on the pinned path (missing version, unparsable content) yields
    /// [`ReadOutcome::FallbackToLatest`].
    pub async fn read_resolved(&self, path: &str, pinned: Option<&str>) -> VfsResult<ReadOutcome> {
        let path = self.logical_path(path);
        let key = self.root.key(&path);
        if !self.is_file(&path).await? {
            return Err(VfsError::NotFound { path: key });
        }
        let notebook = document::is_notebook(&path);

        let mut fallback = None;
        if let (Some(version_id), true) = (pinned, notebook) {
            match self.read_pinned(&path, &key, version_id).await {
                Ok((content, info)) => {
                    debug!(key = %key, version_id, "read pinned version");
                    return Ok(ReadOutcome::Resolved {
                        content,
                        version: Some(info),
                    });
                }
                Err(err) => fallback = Some(err.to_string()),
            }
        }

        let (content, version) = self.read_latest(&path, &key, notebook).await?;
        Ok(match fallback {
            Some(reason) => ReadOutcome::FallbackToLatest {
                content,
                version,
                reason,
            },
            None => ReadOutcome::Resolved { content, version },
        })
    }

    async fn read_pinned(
        &self,
        path: &str,
        key: &str,
        version_id: &str,
    ) -> VfsResult<(Bytes, VersionInfo)> {
        let data = self.store.get_object(key, Some(version_id)).await?;
        let info = VersionInfo::pinned(self.get_versions(path).await?, version_id);
        let decorated = document::decorate(&data, &info)?;
        Ok((Bytes::from(decorated), info))
    }

    async fn read_latest(
        &self,
        path: &str,
        key: &str,
        notebook: bool,
    ) -> VfsResult<(Bytes, Option<VersionInfo>)> {
        let data = self.store.get_object(key, None).await?;
        if !notebook {
            return Ok((data, None));
        }

        let info = VersionInfo::latest(self.get_versions(path).await?);
        match document::decorate(&data, &info) {
            Ok(decorated) => Ok((Bytes::from(decorated), Some(info))),
            Err(err) => {
                warn!(key = %key, error = %err, "notebook is not a JSON object, returning it as is");
                Ok((data, Some(info)))
            }
        }
    }

    fn negotiate_format(
        &self,
        path: &str,
        content: Bytes,
        format: Option<&str>,
    ) -> VfsResult<FileContent> {
        if matches!(format, None | Some("text")) {
            match String::from_utf8(content.to_vec()) {
                Ok(text) => {
                    return Ok(FileContent {
                        content: text,
                        format: ContentFormat::Text,
                    });
                }
                Err(_) if format.is_some() => {
                    let message = format!("{} is not UTF-8 encoded", self.root.key(path));
                    error!("{message}");
                    return Err(VfsError::BadFormat { message });
                }
                Err(_) => {}
            }
        }
        Ok(FileContent {
            content: BASE64_STANDARD.encode(&content),
            format: ContentFormat::Base64,
        })
    }

    /// Write content given as `text` or `base64`.
    pub async fn write(&self, path: &str, content: &str, format: &str) -> VfsResult<PutOutcome> {
        let key = self.root.key(path);
        debug!(key = %key, format, "writing file");
        let body = match format.parse::<ContentFormat>()? {
            ContentFormat::Text => Bytes::copy_from_slice(content.as_bytes()),
            ContentFormat::Base64 => BASE64_STANDARD
                .decode(content.as_bytes())
                .map(Bytes::from)
                .map_err(|e| VfsError::BadEncoding {
                    path: key.clone(),
                    message: e.to_string(),
                })?,
        };
        Ok(self.store.put_object(&key, body).await?)
    }

    /// Write a serialized document as UTF-8.
    pub async fn write_document(&self, path: &str, content: &str) -> VfsResult<PutOutcome> {
        let key = self.root.key(path);
        debug!(key = %key, "writing notebook");
        Ok(self
            .store
            .put_object(&key, Bytes::copy_from_slice(content.as_bytes()))
            .await?)
    }

    /// Copy a file, or a directory recursively.
    ///
    /// Directory copies are not atomic: a failure part-way leaves the
    /// destination partially populated.
    pub async fn copy(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let old_path = self.logical_path(old_path);
        let new_path = self.logical_path(new_path);
        debug!(from = %old_path, to = %new_path, "copying");

        if self.is_directory(&old_path).await? {
            let mut pending = vec![(old_path, new_path)];
            while let Some((src_dir, dst_dir)) = pending.pop() {
                for child in self.list(&src_dir).await? {
                    let dst_child = self.rebase(&child, &src_dir, &dst_dir);
                    if self.is_directory(&child).await? {
                        pending.push((child, dst_child));
                    } else if self.is_file(&child).await? {
                        self.store
                            .copy_object(&self.root.key(&child), &self.root.key(&dst_child))
                            .await?;
                    }
                }
                self.make_directory(&dst_dir).await?;
            }
            Ok(())
        } else if self.is_file(&old_path).await? {
            self.store
                .copy_object(&self.root.key(&old_path), &self.root.key(&new_path))
                .await?;
            Ok(())
        } else {
            Err(VfsError::NotFound {
                path: self.root.key(&old_path),
            })
        }
    }

    /// Move a file or directory: copy, then remove the source.
    ///
    /// Moving a path onto itself is a no-op. Moving it into its own subtree
    /// fails with [`VfsError::MoveIntoSelf`] before anything is written.
    /// Otherwise not atomic: if the removal fails after the copy succeeded,
    /// both the source and the destination exist.
    pub async fn rename(&self, old_path: &str, new_path: &str) -> VfsResult<()> {
        let old_path = self.logical_path(old_path);
        let new_path = self.logical_path(new_path);
        if old_path == new_path {
            debug!(path = %old_path, "move onto itself, nothing to do");
            return Ok(());
        }
        if self.is_within(&new_path, &old_path) {
            return Err(VfsError::MoveIntoSelf {
                from: self.root.key(&old_path),
                to: self.root.key(&new_path),
            });
        }

        debug!(from = %old_path, to = %new_path, "moving");
        self.copy(&old_path, &new_path).await?;
        self.remove(&old_path).await
    }

    /// Remove a file, or a directory with everything under it.
    pub async fn remove(&self, path: &str) -> VfsResult<()> {
        let key = self.root.key(path);
        if self.is_file(path).await? {
            debug!(key = %key, "removing file");
            self.store.delete_object(&key).await?;
        } else if self.is_directory(path).await? {
            let prefix = self.root.dir_prefix(path);
            let removed = self.store.delete_prefix(&prefix).await?;
            debug!(prefix = %prefix, removed, "removed directory");
        } else {
            return Err(VfsError::NotFound { path: key });
        }
        Ok(())
    }

    /// Create a directory by writing its marker. Idempotent.
    pub async fn make_directory(&self, path: &str) -> VfsResult<()> {
        let key = self.marker_key(path);
        debug!(key = %key, "making directory");
        self.store.put_object(&key, Bytes::new()).await?;
        Ok(())
    }

    /// Latest revision of a file.
    pub async fn get_latest_version(&self, path: &str) -> VfsResult<VersionRecord> {
        let key = self.root.key(path);
        let versions = self
            .store
            .list_object_versions(&key, self.version_page_size)
            .await?;
        let latest = versions
            .iter()
            .find(|v| v.is_latest)
            .or_else(|| versions.first())
            .ok_or_else(|| VfsError::NotFound { path: key.clone() })?;
        let tags = self
            .store
            .get_object_tagging(&key, &latest.version_id)
            .await?;
        Ok(VersionRecord::new(latest, tags))
    }

    /// Revisions of a file, newest first, limited to one page.
    pub async fn get_versions(&self, path: &str) -> VfsResult<Vec<VersionRecord>> {
        let key = self.root.key(path);
        let versions = self
            .store
            .list_object_versions(&key, self.version_page_size)
            .await?;

        let mut records = Vec::with_capacity(versions.len());
        for version in &versions {
            let tags = self
                .store
                .get_object_tagging(&key, &version.version_id)
                .await?;
            records.push(VersionRecord::new(version, tags));
        }
        Ok(records)
    }

    /// Replace the tags on one revision of a file.
    pub async fn tag_version(
        &self,
        path: &str,
        version_id: &str,
        tags: Vec<ObjectTag>,
    ) -> VfsResult<()> {
        let key = self.root.key(path);
        debug!(key = %key, version_id, "tagging version");
        Ok(self
            .store
            .put_object_tagging(&key, version_id, tags)
            .await?)
    }

    /// Logical form of a path: root prefix stripped, delimiters collapsed.
    /// Pins are keyed by this form.
    #[must_use]
    pub fn logical_path(&self, path: &str) -> String {
        self.root.normalize(&self.root.strip_root_prefix(path))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn marker_key(&self, path: &str) -> String {
        self.root.full_key(&[path, self.dir_keep_file.as_str()])
    }

    fn is_marker(&self, path: &str) -> bool {
        self.root.file_name(path) == self.dir_keep_file
    }

    /// Whether logical `path` lies strictly below logical `dir`.
    fn is_within(&self, path: &str, dir: &str) -> bool {
        dir.is_empty()
            || path
                .strip_prefix(dir)
                .is_some_and(|rest| rest.starts_with(self.root.delimiter()))
    }

    /// Rewrite `child` from under `src_dir` to under `dst_dir`.
    fn rebase(&self, child: &str, src_dir: &str, dst_dir: &str) -> String {
        let delimiter = self.root.delimiter();
        let rest = child.strip_prefix(src_dir).unwrap_or(child);
        let rest = rest.strip_prefix(delimiter).unwrap_or(rest);
        if dst_dir.is_empty() {
            rest.to_owned()
        } else {
            format!("{dst_dir}{delimiter}{rest}")
        }
    }
}
