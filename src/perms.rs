//! Per-directory permission rules.
//!
//! A directory declares its rule in a `_.permissions.json` marker file with
//! `admin`/`read`/`write` principal lists. Descendants inherit the nearest
//! ancestor's rule; a deeper rule overrides the ancestor outright (sets are
//! not merged, so an empty `write` list revokes write for everyone except
//! the rule's admins). The datasite owner always has full access, and the
//! `*` principal matches any identity.
//!
//! Resolution is a pure function of the rule chain from the datasite root to
//! the path, evaluated the same way on the client (optimistic early denial)
//! and the server (authoritative).

use crate::path::SyncPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Marker file name carrying a directory's [`PermissionRule`].
pub const PERMISSION_FILE: &str = "_.permissions.json";

/// Wildcard principal matching every identity.
pub const EVERYONE: &str = "*";

/// The operation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

#[derive(Error, Debug)]
pub enum PermError {
    #[error("failed to read permission file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid permission file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Principal sets declared by one directory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default)]
    pub admin: Vec<String>,
    #[serde(default)]
    pub read: Vec<String>,
    #[serde(default)]
    pub write: Vec<String>,
}

impl PermissionRule {
    /// The implicit rule at a datasite root: owner-only.
    pub fn owner_default(owner: &str) -> Self {
        PermissionRule {
            admin: vec![owner.to_string()],
            read: vec![owner.to_string()],
            write: vec![owner.to_string()],
        }
    }

    /// Owner-managed rule that lets anyone read.
    pub fn public_read(owner: &str) -> Self {
        PermissionRule {
            admin: vec![owner.to_string()],
            read: vec![owner.to_string(), EVERYONE.to_string()],
            write: vec![owner.to_string()],
        }
    }

    /// Owner-managed rule that lets anyone read and write.
    pub fn public_write(owner: &str) -> Self {
        PermissionRule {
            admin: vec![owner.to_string()],
            read: vec![owner.to_string(), EVERYONE.to_string()],
            write: vec![owner.to_string(), EVERYONE.to_string()],
        }
    }

    fn set_for(&self, level: AccessLevel) -> &[String] {
        match level {
            AccessLevel::Read => &self.read,
            AccessLevel::Write => &self.write,
            AccessLevel::Admin => &self.admin,
        }
    }

    /// Whether `user` holds `level` under this rule. Admin implies read and
    /// write.
    pub fn allows(&self, user: &str, level: AccessLevel) -> bool {
        let is_admin = self
            .admin
            .iter()
            .any(|p| p == user || p == EVERYONE);
        if is_admin {
            return true;
        }
        self.set_for(level)
            .iter()
            .any(|p| p == user || p == EVERYONE)
    }
}

/// Whether a logical path is a permission marker file.
pub fn is_permission_path(path: &SyncPath) -> bool {
    path.file_name() == PERMISSION_FILE
}

/// All permission rules discovered under one filesystem root, keyed by the
/// logical directory they govern.
///
/// Rules are re-resolved per check; the tree is a point-in-time snapshot of
/// the marker files, not a cache with invalidation concerns.
#[derive(Debug, Default)]
pub struct PermissionTree {
    rules: BTreeMap<String, PermissionRule>,
}

impl PermissionTree {
    /// Walk `root` collecting every `_.permissions.json` below it.
    ///
    /// Unparseable marker files are logged and skipped rather than failing
    /// the whole tree; a broken file then behaves like an absent one.
    pub fn load(root: &Path) -> Self {
        let mut rules = BTreeMap::new();
        collect_rules(root, root, &mut rules);
        PermissionTree { rules }
    }

    /// Build a tree from in-memory rules (tests, server fast path).
    pub fn from_rules(rules: impl IntoIterator<Item = (String, PermissionRule)>) -> Self {
        PermissionTree {
            rules: rules.into_iter().collect(),
        }
    }

    /// The deepest rule governing `path`, falling back to the datasite
    /// owner-only default when no marker file applies.
    pub fn resolve(&self, path: &SyncPath) -> PermissionRule {
        let mut current = PermissionRule::owner_default(path.datasite());
        let mut prefix = String::new();
        for segment in path.as_str().split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            if let Some(rule) = self.rules.get(&prefix) {
                current = rule.clone();
            }
        }
        current
    }

    /// Authorize `user` for `level` on `path`.
    ///
    /// The datasite owner is always allowed regardless of declared rules.
    pub fn check(&self, user: &str, path: &SyncPath, level: AccessLevel) -> bool {
        if user == path.datasite() {
            return true;
        }
        self.resolve(path).allows(user, level)
    }
}

fn collect_rules(root: &Path, dir: &Path, rules: &mut BTreeMap<String, PermissionRule>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            collect_rules(root, &path, rules);
        } else if name == PERMISSION_FILE {
            match load_rule(&path) {
                Ok(rule) => {
                    if let Ok(logical) = SyncPath::from_local(root, dir) {
                        rules.insert(logical.as_str().to_string(), rule);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping invalid permission file"),
            }
        }
    }
}

fn load_rule(path: &Path) -> Result<PermissionRule, PermError> {
    let data = fs::read_to_string(path).map_err(|source| PermError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| PermError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Write a rule to the marker file inside `dir`.
pub fn write_rule(dir: &Path, rule: &PermissionRule) -> std::io::Result<()> {
    let data = serde_json::to_vec_pretty(rule)?;
    fs::write(dir.join(PERMISSION_FILE), data)
}
