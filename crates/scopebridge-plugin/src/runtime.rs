//! Scope runtime trait and loader.
//!
//! This module defines the language-agnostic [`ScriptRuntime`] trait that
//! scripting language implementations satisfy, and the [`ScopeLoader`] that
//! discovers scope directories and hands them to the right runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use scopebridge_core::{HandleTable, ScopeMetadata};
use scopebridge_host::{HostVersion, Scope, ScopeAdapter};

use crate::config::{MANIFEST_FILE, ScopeConfig, ScopeManifest};
use crate::sandbox::SandboxConfig;
use crate::types::{PluginError, PluginResult};

/// Trait that all scope runtime implementations must satisfy.
pub trait ScriptRuntime: Send + Sync {
    /// Get the name of this runtime (e.g., "lua").
    fn name(&self) -> &'static str;

    /// Get the file extensions this runtime handles (e.g., [".lua"]).
    fn file_extensions(&self) -> &'static [&'static str];

    /// Initialize the runtime with configuration.
    fn init(&mut self, config: &ScopeConfig) -> PluginResult<()>;

    /// Load the scope whose entry script is `source`.
    ///
    /// Handles created by the scope live in `table`.
    fn load_scope(
        &self,
        manifest: &ScopeManifest,
        source: &Path,
        sandbox: &SandboxConfig,
        table: &Arc<HandleTable>,
    ) -> PluginResult<Arc<dyn Scope>>;
}

/// A scope ready to be registered with a host.
#[derive(Clone)]
pub struct LoadedScope {
    /// Manifest from `scope.toml`.
    pub manifest: ScopeManifest,

    /// Path to the scope directory.
    pub path: PathBuf,

    /// Cache directory handed to the scope.
    pub cache_dir: PathBuf,

    /// Temporary directory handed to the scope.
    pub tmp_dir: PathBuf,

    /// The scope logic.
    pub scope: Arc<dyn Scope>,

    table: Arc<HandleTable>,
}

impl std::fmt::Debug for LoadedScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedScope")
            .field("name", &self.manifest.name)
            .field("path", &self.path)
            .finish()
    }
}

impl LoadedScope {
    pub fn id(&self) -> &str {
        &self.manifest.name
    }

    /// Registry entry for this scope.
    pub fn metadata(&self) -> PluginResult<ScopeMetadata> {
        self.manifest.to_metadata(&self.path)
    }

    /// A fresh entry adapter for registering this scope with a host.
    pub fn adapter(&self) -> ScopeAdapter {
        ScopeAdapter::with_table(self.scope.clone(), self.table.clone())
    }
}

/// Discovers scope directories and loads them through their runtime.
pub struct ScopeLoader {
    /// Available runtimes keyed by name.
    runtimes: HashMap<String, Box<dyn ScriptRuntime>>,

    config: ScopeConfig,

    host_version: HostVersion,

    table: Arc<HandleTable>,
}

impl ScopeLoader {
    /// Create a loader using the process-wide handle table.
    pub fn new(config: ScopeConfig) -> Self {
        Self {
            runtimes: HashMap::new(),
            config,
            host_version: HostVersion::MINIMUM,
            table: HandleTable::global(),
        }
    }

    /// Version checked against each manifest's `min_host_version`.
    pub fn with_host_version(mut self, version: HostVersion) -> Self {
        self.host_version = version;
        self
    }

    pub fn with_table(mut self, table: Arc<HandleTable>) -> Self {
        self.table = table;
        self
    }

    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    /// Register a scope runtime.
    pub fn register_runtime(&mut self, runtime: Box<dyn ScriptRuntime>) {
        let name = runtime.name().to_string();
        self.runtimes.insert(name, runtime);
    }

    /// Get a runtime by name.
    pub fn get_runtime(&self, name: &str) -> Option<&dyn ScriptRuntime> {
        self.runtimes.get(name).map(|r| r.as_ref())
    }

    /// Initialize all registered runtimes.
    pub fn init_runtimes(&mut self) -> PluginResult<()> {
        for runtime in self.runtimes.values_mut() {
            runtime.init(&self.config)?;
        }
        Ok(())
    }

    /// Discover and load every scope below the scope directory.
    ///
    /// Scopes that fail to load are logged and skipped.
    pub fn discover_scopes(&self) -> PluginResult<Vec<LoadedScope>> {
        let scope_dir = &self.config.scope_dir;
        if !self.config.enabled || !scope_dir.exists() {
            return Ok(vec![]);
        }

        let mut dirs: Vec<PathBuf> = std::fs::read_dir(scope_dir)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).exists())
            .collect();
        dirs.sort();

        let mut loaded = vec![];
        for dir in dirs {
            match self.load_scope(&dir) {
                Ok(Some(scope)) => loaded.push(scope),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(target: "scope", "skipping {}: {}", dir.display(), e);
                }
            }
        }
        Ok(loaded)
    }

    /// Load a single scope directory. Disabled scopes load as `None`.
    pub fn load_scope(&self, dir: &Path) -> PluginResult<Option<LoadedScope>> {
        let manifest = ScopeManifest::read(dir)?;
        if self.config.is_disabled(&manifest.name) {
            tracing::debug!(target: "scope", "{} is disabled", manifest.name);
            return Ok(None);
        }
        self.check_host_version(&manifest)?;

        let runtime = self.runtimes.get(&manifest.runtime).ok_or_else(|| {
            PluginError::RuntimeNotAvailable {
                runtime: manifest.runtime.clone(),
            }
        })?;

        let entry_file = dir.join(&manifest.entry);
        if !entry_file.exists() {
            return Err(PluginError::NotFound { path: entry_file });
        }

        let sandbox = self.config.sandbox_for(&manifest, dir);
        let scope = runtime.load_scope(&manifest, &entry_file, &sandbox, &self.table)?;
        tracing::info!(target: "scope", "loaded {} {} ({})", manifest.name, manifest.version, runtime.name());

        Ok(Some(LoadedScope {
            cache_dir: self.config.scope_cache_dir(&manifest.name),
            tmp_dir: self.config.scope_tmp_dir(&manifest.name),
            path: dir.to_path_buf(),
            manifest,
            scope,
            table: self.table.clone(),
        }))
    }

    fn check_host_version(&self, manifest: &ScopeManifest) -> PluginResult<()> {
        let Some(required) = &manifest.min_host_version else {
            return Ok(());
        };
        let required: HostVersion = required.parse().map_err(|e| PluginError::ConfigError {
            message: format!("min_host_version: {e}"),
        })?;
        if required > self.host_version {
            return Err(PluginError::IncompatibleHost {
                name: manifest.name.clone(),
                required: required.to_string(),
                found: self.host_version.to_string(),
            });
        }
        Ok(())
    }
}
