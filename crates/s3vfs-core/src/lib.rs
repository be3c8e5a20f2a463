//! Path-addressed virtual file system over a versioned S3 bucket.
//!
//! This crate presents an object-storage bucket as a hierarchical file system
//! for a notebook-editing host and layers a version-selection and release
//! tagging workflow on top of native object versioning.
//!
//! # Architecture
//!
//! ```text
//! VersionedDocumentStore (save reconciliation, pinned versions)
//!        |
//!        v
//! VirtualFileSystem (path algebra, directory markers, version-aware reads)
//!        |
//!        v
//!   ObjectStore trait (S3Store / InMemoryStore)
//! ```

pub mod config;
pub mod contents;
pub mod document;
pub mod error;
pub mod path;
pub mod pins;
pub mod store;
pub mod vfs;

pub use config::VfsConfig;
pub use contents::{DocumentHooks, NotebookValidator, SaveOutcome, VersionedDocumentStore};
pub use document::{SaveDecision, VersionMetadata, VersionRecord};
pub use error::{StoreError, VfsError, VfsResult};
pub use path::RootPrefix;
pub use pins::PinnedVersions;
pub use store::{InMemoryStore, ObjectStore, S3Store};
pub use vfs::{ContentFormat, FileContent, FileStat, ReadOutcome, VirtualFileSystem};
