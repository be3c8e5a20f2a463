//! Path algebra between logical paths and store keys.
//!
//! A logical path such as `a/b.ipynb` lives under a root prefix made of the
//! bucket and an optional sub-prefix. The full key is
//! `<bucket>/[<prefix><delimiter>]<path>`: the bucket is always followed by
//! `/`, whatever the configured delimiter, since that is where stores split
//! the bucket off. Joining is idempotent: a segment that already
//! carries the root prefix is stripped before it is joined again, so
//! `full_key(full_key(p)) == full_key(p)`.
//!
//! A logical path that itself starts with the root prefix followed by the
//! delimiter cannot be told apart from an already-joined key and is treated as
//! one.

use std::fmt;

/// Separator between the bucket and the key inside it.
pub const BUCKET_SEPARATOR: &str = "/";

/// Root prefix (bucket plus optional sub-prefix) and delimiter.
///
/// # Examples
///
/// ```
/// use s3vfs_core::path::RootPrefix;
///
/// let root = RootPrefix::new("nb", "proj", "/");
/// assert_eq!(root.key("a/b.ipynb"), "nb/proj/a/b.ipynb");
/// assert_eq!(root.strip_root_prefix("nb/proj/a/b.ipynb"), "a/b.ipynb");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPrefix {
    root: String,
    delimiter: String,
    /// Separator between `root` and the first path segment.
    separator: String,
}

impl RootPrefix {
    /// Build the root prefix from a bucket, an optional sub-prefix (may be
    /// empty) and the path delimiter.
    #[must_use]
    pub fn new(bucket: &str, prefix: &str, delimiter: &str) -> Self {
        let delimiter = if delimiter.is_empty() { "/" } else { delimiter };
        let bucket = normalize_with(bucket, delimiter);
        let prefix = normalize_with(prefix, delimiter);
        let (root, separator) = if prefix.is_empty() {
            (bucket, BUCKET_SEPARATOR)
        } else {
            (format!("{bucket}{BUCKET_SEPARATOR}{prefix}"), delimiter)
        };
        Self {
            root,
            delimiter: delimiter.to_owned(),
            separator: separator.to_owned(),
        }
    }

    /// The root prefix, e.g. `nb/proj`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.root
    }

    /// The path delimiter.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Collapse duplicate delimiters and drop leading/trailing ones.
    #[must_use]
    pub fn normalize(&self, path: &str) -> String {
        normalize_with(path, &self.delimiter)
    }

    /// Remove the root prefix (when present) and one leading delimiter.
    #[must_use]
    pub fn strip_root_prefix(&self, path: &str) -> String {
        let rest = if path == self.root {
            ""
        } else {
            path.strip_prefix(self.root.as_str())
                .and_then(|rest| rest.strip_prefix(self.separator.as_str()))
                .unwrap_or(path)
        };
        rest.strip_prefix(self.delimiter.as_str())
            .unwrap_or(rest)
            .to_owned()
    }

    /// Batch form of [`strip_root_prefix`](Self::strip_root_prefix).
    #[must_use]
    pub fn strip_root_prefixes<I, S>(&self, paths: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .map(|p| self.strip_root_prefix(p.as_ref()))
            .collect()
    }

    /// Join the root prefix with every non-empty segment.
    #[must_use]
    pub fn full_key<S: AsRef<str>>(&self, segments: &[S]) -> String {
        let mut key = self.root.clone();
        let mut separator = self.separator.as_str();
        for segment in segments {
            let segment = self.normalize(&self.strip_root_prefix(segment.as_ref()));
            if segment.is_empty() {
                continue;
            }
            key.push_str(separator);
            key.push_str(&segment);
            separator = &self.delimiter;
        }
        key
    }

    /// Full key for a single logical path.
    #[must_use]
    pub fn key(&self, path: &str) -> String {
        self.full_key(&[path])
    }

    /// Key prefix that every object inside the directory `path` starts with.
    #[must_use]
    pub fn dir_prefix(&self, path: &str) -> String {
        let mut prefix = self.key(path);
        if prefix == self.root {
            prefix.push_str(&self.separator);
        } else {
            prefix.push_str(&self.delimiter);
        }
        prefix
    }

    /// Last segment of a logical path.
    #[must_use]
    pub fn file_name<'a>(&self, path: &'a str) -> &'a str {
        let trimmed = path.trim_end_matches(self.delimiter.as_str());
        trimmed
            .rsplit(self.delimiter.as_str())
            .next()
            .unwrap_or(trimmed)
    }
}

impl fmt::Display for RootPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)
    }
}

fn normalize_with(path: &str, delimiter: &str) -> String {
    path.split(delimiter)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(delimiter)
}
