//! Scope runtime configuration and manifests.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use scopebridge_core::{ScopeMetadata, Value};
use serde::{Deserialize, Serialize};

use crate::sandbox::{Permission, SandboxConfig};
use crate::types::{PluginError, PluginResult};

/// File every scope directory carries.
pub const MANIFEST_FILE: &str = "scope.toml";

/// Runtime-wide configuration for scripted scopes.
#[derive(Debug, Clone)]
pub struct ScopeConfig {
    /// Directory scanned for scope directories.
    pub scope_dir: PathBuf,

    /// Root under which each scope gets its cache directory.
    pub cache_dir: PathBuf,

    /// Root under which each scope gets its temporary directory.
    pub tmp_dir: PathBuf,

    /// Whether scripted scopes are loaded at all.
    pub enabled: bool,

    /// Maximum memory per scope in MB (0 = unlimited).
    pub max_memory_mb: usize,

    /// Scope names that are never loaded.
    pub disabled_scopes: HashSet<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scopebridge");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("scopebridge");

        Self {
            scope_dir: config_dir.join("scopes"),
            cache_dir,
            tmp_dir: std::env::temp_dir().join("scopebridge"),
            enabled: true,
            max_memory_mb: 64,
            disabled_scopes: HashSet::new(),
        }
    }
}

impl ScopeConfig {
    /// Create a new config with a custom scope directory.
    pub fn with_scope_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scope_dir = dir.into();
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    pub fn with_memory_limit(mut self, mb: usize) -> Self {
        self.max_memory_mb = mb;
        self
    }

    /// Disable a specific scope.
    pub fn disable_scope(mut self, name: impl Into<String>) -> Self {
        self.disabled_scopes.insert(name.into());
        self
    }

    /// Check if a scope is disabled.
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled_scopes.contains(name)
    }

    /// Cache directory handed to scope `name`.
    pub fn scope_cache_dir(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Temporary directory handed to scope `name`.
    pub fn scope_tmp_dir(&self, name: &str) -> PathBuf {
        self.tmp_dir.join(name)
    }

    /// Sandbox for a scope installed in `dir` with the given manifest.
    pub fn sandbox_for(&self, manifest: &ScopeManifest, dir: &Path) -> SandboxConfig {
        let mut sandbox = SandboxConfig::default()
            .with_memory_limit(self.max_memory_mb * 1024 * 1024)
            .allow_read(dir);
        for permission in &manifest.permissions {
            sandbox = sandbox.grant(*permission);
        }
        sandbox
    }
}

/// A scope's `scope.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeManifest {
    /// Scope id (unique identifier).
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub icon: String,

    #[serde(default)]
    pub art: String,

    #[serde(default)]
    pub search_hint: String,

    #[serde(default)]
    pub keywords: BTreeSet<String>,

    #[serde(default)]
    pub invisible: bool,

    #[serde(default)]
    pub location_data_needed: bool,

    /// Runtime to use.
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Entry point file (relative to the scope directory).
    #[serde(default = "default_entry")]
    pub entry: String,

    /// Oldest host version the scope runs on.
    #[serde(default)]
    pub min_host_version: Option<String>,

    /// Permissions beyond the default sandbox.
    #[serde(default)]
    pub permissions: Vec<Permission>,

    /// Settings the scope reads through its base.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_runtime() -> String {
    "lua".to_string()
}

fn default_entry() -> String {
    "main.lua".to_string()
}

impl ScopeManifest {
    /// Parse a manifest from its TOML text.
    pub fn parse(text: &str) -> PluginResult<Self> {
        let manifest: Self = toml::from_str(text).map_err(|e| PluginError::ConfigError {
            message: e.to_string(),
        })?;
        if manifest.name.is_empty() {
            return Err(PluginError::ConfigError {
                message: "scope name cannot be empty".to_string(),
            });
        }
        Ok(manifest)
    }

    /// Read `scope.toml` from a scope directory.
    pub fn read(dir: &Path) -> PluginResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(PluginError::NotFound { path });
        }
        Self::parse(&std::fs::read_to_string(&path)?)
    }

    /// Settings as one structured object.
    pub fn settings_value(&self) -> Value {
        Value::Object(self.settings.clone())
    }

    /// Registry entry for the scope installed in `dir`.
    pub fn to_metadata(&self, dir: &Path) -> PluginResult<ScopeMetadata> {
        let display_name = if self.display_name.is_empty() {
            self.name.clone()
        } else {
            self.display_name.clone()
        };
        ScopeMetadata::builder()
            .scope_id(self.name.as_str())
            .display_name(display_name)
            .description(self.description.as_str())
            .author(self.author.as_str())
            .icon(self.icon.as_str())
            .art(self.art.as_str())
            .search_hint(self.search_hint.as_str())
            .scope_directory(dir)
            .invisible(self.invisible)
            .location_data_needed(self.location_data_needed)
            .keywords(self.keywords.clone())
            .build()
            .map_err(|e| PluginError::ConfigError {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults() {
        let manifest = ScopeManifest::parse("name = \"weather\"").unwrap();
        assert_eq!(manifest.runtime, "lua");
        assert_eq!(manifest.entry, "main.lua");
        assert_eq!(manifest.version, "0.1.0");
        assert!(manifest.min_host_version.is_none());
        assert_eq!(manifest.settings_value(), Value::object());
    }

    #[test]
    fn test_manifest_settings_and_permissions() {
        let manifest = ScopeManifest::parse(
            r#"
name = "weather"
display_name = "Weather"
permissions = ["os"]

[settings]
units = "metric"
days = 5
"#,
        )
        .unwrap();
        assert_eq!(manifest.permissions, vec![Permission::Os]);
        assert_eq!(manifest.settings.get("units"), Some(&Value::from("metric")));
        assert_eq!(manifest.settings.get("days"), Some(&Value::Integer(5)));

        let metadata = manifest.to_metadata(Path::new("/srv/weather")).unwrap();
        assert_eq!(metadata.scope_id, "weather");
        assert_eq!(metadata.display_name, "Weather");
        assert_eq!(metadata.scope_directory, PathBuf::from("/srv/weather"));
    }

    #[test]
    fn test_manifest_requires_name() {
        assert!(matches!(
            ScopeManifest::parse("name = \"\""),
            Err(PluginError::ConfigError { .. })
        ));
        assert!(ScopeManifest::parse("version = \"1\"").is_err());
    }

    #[test]
    fn test_disabled_scopes() {
        let config = ScopeConfig::default().disable_scope("noisy");
        assert!(config.is_disabled("noisy"));
        assert!(!config.is_disabled("weather"));
        assert_eq!(
            config.with_cache_dir("/var/cache").scope_cache_dir("weather"),
            PathBuf::from("/var/cache/weather")
        );
    }
}
