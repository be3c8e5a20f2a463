//! Pinned-version table.
//!
//! Maps a logical path to the version ID a reader asked to keep seeing. The
//! table belongs to one [`VersionedDocumentStore`](crate::contents::VersionedDocumentStore)
//! and is handed to reads by reference. Entries are hints: losing them only
//! means reads fall back to the latest version. Concurrent writers on the same
//! path are last-write-wins.

use dashmap::DashMap;
use tracing::debug;

/// Path -> requested version ID.
#[derive(Debug, Default)]
pub struct PinnedVersions {
    pins: DashMap<String, String>,
}

impl PinnedVersions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pinned version for `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<String> {
        self.pins.get(path).map(|entry| entry.value().clone())
    }

    /// Set or clear the pin for `path`. `None` clears it.
    pub fn set(&self, path: &str, version_id: Option<&str>) {
        match version_id {
            Some(version_id) => {
                debug!(path, version_id, "pinned version");
                self.pins.insert(path.to_owned(), version_id.to_owned());
            }
            None => self.unpin(path),
        }
    }

    /// Clear the pin for `path`.
    pub fn unpin(&self, path: &str) {
        if self.pins.remove(path).is_some() {
            debug!(path, "cleared pinned version");
        }
    }

    /// Drop every pin.
    pub fn clear(&self) {
        self.pins.clear();
    }

    /// Number of pinned paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether no path is pinned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}
