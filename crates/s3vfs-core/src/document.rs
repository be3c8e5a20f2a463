//! Version metadata embedded in notebook documents.
//!
//! The editing host and this crate exchange version state through the
//! document's top-level `metadata` object. Field names are fixed by the host:
//!
//! | field | written by | meaning |
//! |-------|------------|---------|
//! | `s3_versions` | read | version history of the key |
//! | `s3_requested_version` | read, host | version the user asked for |
//! | `s3_current_version` | read | version the content came from |
//! | `s3_latest_version` | read | head of the history |
//! | `s3_create_release` | host | release name to attach on save |
//! | `s3_latest_release_tag` | save | last release counter used |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::store::{ObjectTag, StoredVersion};

/// Version history of the document.
pub const S3_VERSIONS: &str = "s3_versions";
/// Version the user asked to see.
pub const S3_REQUESTED_VERSION: &str = "s3_requested_version";
/// Version the content was read from.
pub const S3_CURRENT_VERSION: &str = "s3_current_version";
/// Latest version of the key at read time.
pub const S3_LATEST_VERSION: &str = "s3_latest_version";
/// Release name requested by the host for this save.
pub const S3_CREATE_RELEASE: &str = "s3_create_release";
/// Counter of the last release created for the document.
pub const S3_LATEST_RELEASE_TAG: &str = "s3_latest_release_tag";

/// Tag key holding the release name on a tagged version.
pub const RELEASE_NAME_TAG: &str = "s3_release";
/// Tag key holding the release counter on a tagged version.
pub const RELEASE_COUNTER_TAG: &str = "s3_release_tag";

/// File extension of documents that carry version metadata.
pub const NOTEBOOK_EXTENSION: &str = ".ipynb";

const TIMESTAMP_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

/// Whether the path names a notebook document.
#[must_use]
pub fn is_notebook(path: &str) -> bool {
    path.ends_with(NOTEBOOK_EXTENSION)
}

/// One revision of a key as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Version ID.
    pub version_id: String,
    /// Modification time, `MM/DD/YYYY, HH:MM:SS` in UTC.
    pub timestamp: String,
    /// Tags attached to this version.
    pub tags: Vec<ObjectTag>,
    /// Whether this is the latest version.
    pub is_latest: bool,
}

impl VersionRecord {
    /// Build a record from a listing entry and its tags.
    #[must_use]
    pub fn new(version: &StoredVersion, tags: Vec<ObjectTag>) -> Self {
        Self {
            version_id: version.version_id.clone(),
            timestamp: format_timestamp(version.last_modified),
            tags,
            is_latest: version.is_latest,
        }
    }

    /// Release name carried by this version, if it was tagged as a release.
    #[must_use]
    pub fn release_name(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == RELEASE_NAME_TAG)
            .map(|t| t.value.as_str())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Version state attached to a read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    /// History, newest first.
    pub versions: Vec<VersionRecord>,
    /// Pinned version the read honoured, if any.
    pub requested: Option<String>,
    /// Version the content came from.
    pub current: Option<String>,
    /// Latest version of the key.
    pub latest: Option<String>,
}

impl VersionInfo {
    /// Version info for a read of the latest revision.
    #[must_use]
    pub fn latest(versions: Vec<VersionRecord>) -> Self {
        let latest = latest_version_id(&versions);
        Self {
            versions,
            requested: None,
            current: latest.clone(),
            latest,
        }
    }

    /// Version info for a read of a pinned revision.
    #[must_use]
    pub fn pinned(versions: Vec<VersionRecord>, version_id: &str) -> Self {
        Self {
            latest: latest_version_id(&versions),
            versions,
            requested: Some(version_id.to_owned()),
            current: Some(version_id.to_owned()),
        }
    }
}

/// ID of the latest version in a newest-first listing.
#[must_use]
pub fn latest_version_id(versions: &[VersionRecord]) -> Option<String> {
    versions
        .iter()
        .find(|v| v.is_latest)
        .or_else(|| versions.first())
        .map(|v| v.version_id.clone())
}

/// Write version metadata into a JSON document and re-serialize it.
///
/// Fails when the content is not a JSON object.
pub fn decorate(content: &[u8], info: &VersionInfo) -> anyhow::Result<Vec<u8>> {
    let mut doc: Value = serde_json::from_slice(content)?;
    let root = doc
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("document root is not a JSON object"))?;
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("document metadata is not a JSON object"))?;

    metadata.insert(S3_VERSIONS.to_owned(), serde_json::to_value(&info.versions)?);
    metadata.insert(S3_REQUESTED_VERSION.to_owned(), opt_value(info.requested.as_deref()));
    metadata.insert(S3_CURRENT_VERSION.to_owned(), opt_value(info.current.as_deref()));
    metadata.insert(S3_LATEST_VERSION.to_owned(), opt_value(info.latest.as_deref()));

    Ok(serde_json::to_vec(&doc)?)
}

fn opt_value(v: Option<&str>) -> Value {
    v.map_or(Value::Null, |s| Value::String(s.to_owned()))
}

/// Outcome of save reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveDecision {
    /// The document carries no version metadata.
    Plain,
    /// The user picked another version while looking at an old one.
    Pin {
        /// Version to pin (`None` clears the pin).
        requested: Option<String>,
    },
    /// The save applies to the head of the history.
    LatestPath {
        /// Whether the user also picked another version.
        version_changed: bool,
    },
    /// The save would overwrite history with an older version.
    Reject,
}

impl SaveDecision {
    /// Decision for an optional metadata block. No block means a plain save.
    #[must_use]
    pub fn for_metadata(meta: Option<&VersionMetadata>) -> Self {
        meta.map_or(Self::Plain, VersionMetadata::decide)
    }
}

/// Typed view of the version fields of a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMetadata {
    /// `s3_requested_version`.
    pub requested: Option<String>,
    /// `s3_current_version`.
    pub current: Option<String>,
    /// `s3_latest_version`.
    pub latest: Option<String>,
    /// `s3_create_release`.
    pub release_request: Option<String>,
    /// `s3_latest_release_tag`, as stored. Validated by
    /// [`next_release_tag`](Self::next_release_tag).
    pub latest_release_tag: Option<Number>,
}

impl VersionMetadata {
    /// Extract the metadata block. Returns `None` unless the requested,
    /// current and latest fields are all present (null counts as present).
    #[must_use]
    pub fn from_document(doc: &Value) -> Option<Self> {
        let metadata = doc.get("metadata")?.as_object()?;
        let requested = metadata.get(S3_REQUESTED_VERSION)?;
        let current = metadata.get(S3_CURRENT_VERSION)?;
        let latest = metadata.get(S3_LATEST_VERSION)?;

        Some(Self {
            requested: version_id(requested),
            current: version_id(current),
            latest: version_id(latest),
            release_request: metadata.get(S3_CREATE_RELEASE).and_then(version_id),
            latest_release_tag: metadata.get(S3_LATEST_RELEASE_TAG).and_then(release_counter),
        })
    }

    /// Reconcile the requested version against current and latest.
    #[must_use]
    pub fn decide(&self) -> SaveDecision {
        let version_changed = self.requested != self.current;
        let version_is_latest = self.current == self.latest;
        let version_was_requested = self.latest.is_some();

        match (version_changed && version_was_requested, version_is_latest) {
            (true, false) => SaveDecision::Pin {
                requested: self.requested.clone(),
            },
            (true, true) => SaveDecision::LatestPath {
                version_changed: true,
            },
            (false, false) => SaveDecision::Reject,
            (false, true) => SaveDecision::LatestPath {
                version_changed: false,
            },
        }
    }

    /// Counter for the next release: 0 for the first, then one more than the
    /// last recorded counter.
    ///
    /// Fails when the recorded counter is not a non-negative integer or has
    /// no successor.
    pub fn next_release_tag(&self) -> anyhow::Result<u64> {
        let Some(last) = &self.latest_release_tag else {
            return Ok(0);
        };
        let last = counter_value(last)
            .ok_or_else(|| anyhow::anyhow!("{S3_LATEST_RELEASE_TAG} is not a valid counter: {last}"))?;
        last.checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("{S3_LATEST_RELEASE_TAG} cannot be incremented: {last}"))
    }
}

fn version_id(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn release_counter(value: &Value) -> Option<Number> {
    match value {
        Value::Number(n) => Some(n.clone()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Integral, non-negative counter value. Accepts floats such as `3.0`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]
fn counter_value(n: &Number) -> Option<u64> {
    const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;
    n.as_u64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < U64_LIMIT)
            .map(|f| f as u64)
    })
}

/// Record a created release in the document: store the counter and drop the
/// request.
pub fn record_release(doc: &mut Value, tag: u64) {
    if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert(S3_LATEST_RELEASE_TAG.to_owned(), Value::from(tag));
        metadata.remove(S3_CREATE_RELEASE);
    }
}

/// Remove fields derived on read so they are not persisted.
pub fn strip_derived(doc: &mut Value) {
    if let Some(metadata) = doc.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove(S3_VERSIONS);
    }
}

/// Tags recorded on the version created by a release save.
#[must_use]
pub fn release_tags(name: &str, tag: u64) -> Vec<ObjectTag> {
    vec![
        ObjectTag::new(RELEASE_NAME_TAG, name),
        ObjectTag::new(RELEASE_COUNTER_TAG, tag.to_string()),
    ]
}
