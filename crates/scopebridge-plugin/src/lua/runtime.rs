//! Lua runtime implementation.

use std::path::Path;
use std::sync::Arc;

use mlua::{Function, Lua, Table, Value as LuaValue};
use scopebridge_core::HandleTable;
use scopebridge_host::Scope;

use crate::config::{ScopeConfig, ScopeManifest};
use crate::runtime::ScriptRuntime;
use crate::sandbox::{Permission, SandboxConfig};
use crate::types::{PluginError, PluginResult};

use super::bindings;
use super::scope::LuaScope;

/// Globals removed from every scope state.
const STRIPPED_GLOBALS: &[&str] = &["loadfile", "dofile", "load", "io", "debug"];

/// Lua scope runtime. Every scope gets its own Lua state.
#[derive(Debug, Default)]
pub struct LuaRuntime {
    /// Whether the runtime has been initialized.
    initialized: bool,
}

impl LuaRuntime {
    /// Create a new Lua runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sandboxed state with the `scopes` namespace installed.
    fn create_state(
        &self,
        name: &str,
        sandbox: &SandboxConfig,
        table: &Arc<HandleTable>,
        scope_dir: &Path,
    ) -> PluginResult<Lua> {
        let lua = Lua::new();

        if sandbox.max_memory > 0 {
            lua.set_memory_limit(sandbox.max_memory)
                .map_err(|e| PluginError::load(name, e))?;
        }

        let globals = lua.globals();
        for global in STRIPPED_GLOBALS {
            globals
                .set(*global, LuaValue::Nil)
                .map_err(|e| PluginError::load(name, e))?;
        }
        if !sandbox.has_permission(Permission::Os) {
            globals
                .set("os", LuaValue::Nil)
                .map_err(|e| PluginError::load(name, e))?;
        }

        // require() resolves modules inside the scope directory only
        let package: Table = globals.get("package").map_err(|e| PluginError::load(name, e))?;
        package
            .set("path", scope_dir.join("?.lua").to_string_lossy().into_owned())
            .map_err(|e| PluginError::load(name, e))?;
        package.set("cpath", "").map_err(|e| PluginError::load(name, e))?;
        package
            .set("loadlib", LuaValue::Nil)
            .map_err(|e| PluginError::load(name, e))?;

        let scopes = bindings::create_scopes_api(&lua, name, table, sandbox, scope_dir)
            .map_err(|e| PluginError::LoadError {
                name: name.to_string(),
                message: format!("Failed to create scopes table: {}", e),
            })?;
        globals.set("scopes", scopes).map_err(|e| PluginError::load(name, e))?;

        Ok(lua)
    }
}

impl ScriptRuntime for LuaRuntime {
    fn name(&self) -> &'static str {
        "lua"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &[".lua"]
    }

    fn init(&mut self, config: &ScopeConfig) -> PluginResult<()> {
        tracing::debug!(target: "scope", "scope directory {}", config.scope_dir.display());
        self.initialized = true;
        Ok(())
    }

    fn load_scope(
        &self,
        manifest: &ScopeManifest,
        source: &Path,
        sandbox: &SandboxConfig,
        table: &Arc<HandleTable>,
    ) -> PluginResult<Arc<dyn Scope>> {
        let name = manifest.name.as_str();
        if !self.initialized {
            return Err(PluginError::LoadError {
                name: name.to_string(),
                message: "lua runtime is not initialized".to_string(),
            });
        }

        let code = std::fs::read_to_string(source)?;
        let scope_dir = source.parent().unwrap_or(Path::new("."));
        let lua = self.create_state(name, sandbox, table, scope_dir)?;

        let module: Table = lua
            .load(&code)
            .set_name(format!("@{}/{}", name, manifest.entry))
            .eval()
            .map_err(|e| PluginError::load(name, e))?;

        for required in ["search", "preview"] {
            let defined: Option<Function> = module.get(required).map_err(|e| PluginError::load(name, e))?;
            if defined.is_none() {
                return Err(PluginError::LoadError {
                    name: name.to_string(),
                    message: format!("module does not define a {required} function"),
                });
            }
        }

        let scope = LuaScope::new(name, lua, module, table.clone()).map_err(|e| PluginError::load(name, e))?;
        Ok(Arc::new(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(sandbox: &SandboxConfig) -> Lua {
        LuaRuntime::new()
            .create_state("weather", sandbox, &Arc::new(HandleTable::new()), Path::new("/srv/weather"))
            .unwrap()
    }

    #[test]
    fn test_stripped_globals() {
        let lua = state(&SandboxConfig::default());
        let (load, io, os): (bool, bool, bool) = lua
            .load("return load == nil, io == nil, os == nil")
            .eval()
            .unwrap();
        assert!(load && io && os);
    }

    #[test]
    fn test_os_permission_keeps_os() {
        let lua = state(&SandboxConfig::default().grant(Permission::Os));
        let has_clock: bool = lua.load("return type(os.clock) == 'function'").eval().unwrap();
        assert!(has_clock);
    }

    #[test]
    fn test_scopes_namespace() {
        let lua = state(&SandboxConfig::default());
        let uri: String = lua
            .load("return scopes.query_uri(scopes.query('weather', 'leeds'))")
            .eval()
            .unwrap();
        assert!(uri.starts_with("scope://weather"));
        let encoded: String = lua.load("return scopes.json_encode({1, 0/0})").eval().unwrap();
        assert_eq!(encoded, "[1,null]");
    }

    #[test]
    fn test_load_requires_initialization() {
        let manifest = ScopeManifest::parse("name = \"weather\"").unwrap();
        let loaded = LuaRuntime::new().load_scope(
            &manifest,
            Path::new("/nonexistent/main.lua"),
            &SandboxConfig::default(),
            &Arc::new(HandleTable::new()),
        );
        assert!(matches!(loaded.err(), Some(PluginError::LoadError { .. })));
    }
}
