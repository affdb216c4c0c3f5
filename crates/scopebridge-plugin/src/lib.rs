//! Scripted scopes for scopebridge.
//!
//! This crate loads scopes written in a scripting language and adapts them
//! to the host-side [`Scope`](scopebridge_host::Scope) contract.
//!
//! # Architecture
//!
//! - [`ScriptRuntime`] is implemented once per scripting language
//!   (currently Lua).
//! - [`ScopeLoader`] discovers scope directories carrying a `scope.toml`
//!   manifest and loads each through its runtime.
//! - Scope scripts see request objects as userdata and reach bridge helpers
//!   through the `scopes` namespace.
//!
//! # Example scope (Lua)
//!
//! ```lua
//! local scope = {}
//!
//! function scope.search(query, metadata, reply, cancel)
//!     local towns = reply:register_category("towns", "Towns")
//!     local result = scopes.result(towns)
//!     result:set("uri", "weather://" .. query.query_string)
//!     result:set("title", query.query_string)
//!     reply:push(result)
//! end
//!
//! function scope.preview(result, metadata, reply, cancel)
//!     reply:push_widgets({ id = "header", type = "header", title = result:title() })
//! end
//!
//! return scope
//! ```

pub mod config;
pub mod lua;
pub mod runtime;
pub mod sandbox;
pub mod types;

pub use config::{MANIFEST_FILE, ScopeConfig, ScopeManifest};
pub use lua::LuaRuntime;
pub use runtime::{LoadedScope, ScopeLoader, ScriptRuntime};
pub use sandbox::{Permission, SandboxConfig};
pub use types::{PluginError, PluginResult};

/// A loader with every built-in runtime registered and initialized.
pub fn default_loader(config: ScopeConfig) -> PluginResult<ScopeLoader> {
    let mut loader = ScopeLoader::new(config);
    loader.register_runtime(Box::new(LuaRuntime::new()));
    loader.init_runtimes()?;
    Ok(loader)
}
