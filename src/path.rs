//! Logical sync paths.
//!
//! Every tracked file is addressed by a [`SyncPath`]: a relative,
//! `/`-separated path whose first segment names the datasite that owns it
//! (an email-like identity such as `alice@example.com`). The same logical
//! path addresses the file on the client, on the server, and on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while parsing a [`SyncPath`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path must be relative: {0}")]
    Absolute(String),
    #[error("path contains traversal segment: {0}")]
    Traversal(String),
    #[error("path has no datasite segment: {0}")]
    MissingDatasite(String),
}

/// A validated logical path, rooted at a datasite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncPath(String);

impl SyncPath {
    /// Parse and validate a logical path.
    ///
    /// Rejects empty and absolute paths, `.`/`..` segments, and paths whose
    /// first segment is not a datasite identity (must contain `@`).
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        if raw.starts_with('/') || raw.contains('\\') {
            return Err(PathError::Absolute(raw.to_string()));
        }
        let datasite = trimmed.split('/').next().unwrap_or_default();
        if !datasite.contains('@') {
            return Err(PathError::MissingDatasite(raw.to_string()));
        }
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(PathError::Traversal(raw.to_string()));
            }
        }
        Ok(SyncPath(trimmed.to_string()))
    }

    /// The datasite identity that owns this path (its first segment).
    pub fn datasite(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// The path relative to its datasite root, if any.
    pub fn within_datasite(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, rest)| rest)
    }

    /// The final path segment.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Whether this path lies inside `scope` (or equals it).
    pub fn in_scope(&self, scope: &SyncPath) -> bool {
        self.0 == scope.0 || self.0.starts_with(&format!("{}/", scope.0))
    }

    /// Resolve against a local root directory.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.0.split('/') {
            out.push(segment);
        }
        out
    }

    /// Build a `SyncPath` from a filesystem path under `root`.
    pub fn from_local(root: &Path, abs: &Path) -> Result<Self, PathError> {
        let rel = abs
            .strip_prefix(root)
            .map_err(|_| PathError::Absolute(abs.display().to_string()))?;
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Self::parse(&joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SyncPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SyncPath::parse(&value)
    }
}

impl From<SyncPath> for String {
    fn from(value: SyncPath) -> Self {
        value.0
    }
}
