//! Error types.
//!
//! [`StoreError`] is produced by [`ObjectStore`](crate::store::ObjectStore)
//! backends. [`VfsError`] is what callers of the virtual file system and the
//! document store see; converting a [`StoreError`] preserves its kind so a
//! missing key stays a `NotFound` and a permission failure stays
//! `AccessDenied`.
//!
//! # Usage
//!
//! ```
//! use s3vfs_core::error::{StoreError, VfsError};
//!
//! let err: VfsError = StoreError::NotFound {
//!     key: "nb/a.ipynb".to_owned(),
//! }
//! .into();
//! assert_eq!(err.status_code(), 404);
//! ```

/// Error returned by an object-store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key does not exist (or its latest version is a delete marker).
    #[error("The specified key does not exist: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// The requested version of a key does not exist.
    #[error("The specified version does not exist: key={key}, version_id={version_id}")]
    NoSuchVersion {
        /// The key for the version.
        key: String,
        /// The version ID that was not found.
        version_id: String,
    },

    /// The store refused the request.
    #[error("Access Denied: {key}")]
    AccessDenied {
        /// The key (or prefix) the request targeted.
        key: String,
    },

    /// Transport or backend failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience result type for object-store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Virtual file system error type.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    /// No file or directory at the path.
    #[error("No such file or directory: {path}")]
    NotFound {
        /// The logical path or key that was not found.
        path: String,
    },

    /// Unsupported or mismatched content format.
    #[error("Bad format: {message}")]
    BadFormat {
        /// Description of the format problem.
        message: String,
    },

    /// Content could not be decoded with the requested format.
    #[error("Encoding error saving {path}: {message}")]
    BadEncoding {
        /// The key being written.
        path: String,
        /// Decoder message.
        message: String,
    },

    /// The store denied access.
    #[error("Access Denied: {key}")]
    AccessDenied {
        /// The key (or prefix) the request targeted.
        key: String,
    },

    /// A save targeted a version that is not the latest.
    #[error("Cannot overwrite older versions: {path}")]
    OverwriteRejected {
        /// The document path.
        path: String,
    },

    /// A move whose destination lies inside its own source.
    #[error("Cannot move {from} into itself: {to}")]
    MoveIntoSelf {
        /// The source path.
        from: String,
        /// The destination path.
        to: String,
    },

    /// The document body is not a JSON document the store can handle.
    #[error("Invalid document {path}: {message}")]
    InvalidDocument {
        /// The document path.
        path: String,
        /// Parser or shape message.
        message: String,
    },

    /// Other store failure.
    #[error(transparent)]
    Store(StoreError),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VfsError {
    /// HTTP status code a host should report for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::BadFormat { .. } | Self::BadEncoding { .. } => 400,
            Self::AccessDenied { .. } => 403,
            Self::OverwriteRejected { .. } | Self::MoveIntoSelf { .. } => 409,
            Self::InvalidDocument { .. } => 422,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether this error is an access-denied failure.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

impl From<StoreError> for VfsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { key } => Self::NotFound { path: key },
            StoreError::AccessDenied { key } => Self::AccessDenied { key },
            other => Self::Store(other),
        }
    }
}

/// Convenience result type for virtual file system operations.
pub type VfsResult<T> = Result<T, VfsError>;
