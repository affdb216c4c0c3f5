//! Lua scope runtime.
//!
//! Scopes are Lua 5.4 modules run through mlua, one sandboxed state per
//! scope, with the `scopes` namespace installed as a global.

mod bindings;
mod convert;
mod objects;
mod runtime;
mod scope;

pub use convert::{lua_to_value, value_to_lua};
pub use runtime::LuaRuntime;
pub use scope::LuaScope;
