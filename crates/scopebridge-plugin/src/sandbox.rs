//! Sandboxing for scripted scopes.
//!
//! Scope scripts run with a reduced standard library. Extra capabilities
//! are granted per scope through its manifest.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Permission types that can be granted to scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read files below the allowed paths.
    Read,

    /// Read environment variables.
    Environment,

    /// Use the `os` library (clock, time, date).
    Os,
}

/// Configuration for scope sandboxing.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Paths the scope is allowed to read from.
    pub allowed_read_paths: Vec<PathBuf>,

    /// Maximum memory in bytes (0 = unlimited).
    pub max_memory: usize,

    /// Maximum file size that can be read.
    pub max_read_size: usize,

    /// Granted permissions.
    pub permissions: HashSet<Permission>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allowed_read_paths: vec![],
            max_memory: 64 * 1024 * 1024,
            max_read_size: 4 * 1024 * 1024,
            permissions: HashSet::from([Permission::Read]),
        }
    }
}

impl SandboxConfig {
    /// No permissions at all.
    pub fn minimal() -> Self {
        Self {
            permissions: HashSet::new(),
            ..Self::default()
        }
    }

    /// Every permission, no memory limit.
    pub fn permissive() -> Self {
        Self {
            allowed_read_paths: vec![PathBuf::from("/")],
            max_memory: 0,
            max_read_size: usize::MAX,
            permissions: HashSet::from([Permission::Read, Permission::Environment, Permission::Os]),
        }
    }

    pub fn allow_read(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_read_paths.push(path.into());
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    pub fn grant(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Whether `path` may be read. Paths are compared lexically; `..` is refused.
    pub fn can_read(&self, path: &Path) -> bool {
        if !self.has_permission(Permission::Read) {
            return false;
        }
        if path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return false;
        }
        self.allowed_read_paths.iter().any(|allowed| path.starts_with(allowed))
    }
}
