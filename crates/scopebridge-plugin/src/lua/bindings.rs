//! The `scopes` namespace available to Lua scope scripts.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::{Lua, Table, UserDataRef, Value as LuaValue};
use scopebridge_core::{
    ActivationResponse, ActivationStatus, BridgeError, CannedQuery, HandleTable, RequestError,
    Value, codec,
};
use scopebridge_host::{DepartmentHandle, ResultHandle};

use super::convert::{lua_to_value, value_to_lua};
use super::objects::{
    LuaCategory, LuaDepartment, LuaResponse, LuaResult, outcome, query_from_lua, query_to_lua,
};
use crate::sandbox::{Permission, SandboxConfig};

/// Create the `scopes` namespace for the scope `name` installed in `scope_dir`.
pub fn create_scopes_api(
    lua: &Lua,
    name: &str,
    table: &Arc<HandleTable>,
    sandbox: &SandboxConfig,
    scope_dir: &Path,
) -> mlua::Result<Table> {
    let scopes = lua.create_table()?;
    scopes.set("version", env!("CARGO_PKG_VERSION"))?;

    add_logging(lua, &scopes, name)?;

    // scopes.query(scope_id, query_string?, department_id?, filter_state?)
    let query = lua.create_function(
        |lua, (scope_id, query_string, department_id, filter_state): (String, Option<String>, Option<String>, Option<LuaValue>)| {
            let mut query = CannedQuery::new(
                scope_id,
                query_string.unwrap_or_default(),
                department_id.unwrap_or_default(),
            );
            if let Some(state) = filter_state {
                match lua_to_value(state)? {
                    Value::Object(state) => query.set_filter_state(state),
                    Value::Null => {}
                    other => {
                        return Err(mlua::Error::runtime(format!(
                            "filter state must be a table, got {}",
                            other.type_name()
                        )));
                    }
                }
            }
            query_to_lua(lua, &query)
        },
    )?;
    scopes.set("query", query)?;

    // scopes.query_uri(query) - the scope:// form of a query
    let query_uri = lua.create_function(|_, query: LuaValue| Ok(query_from_lua(query)?.to_uri()))?;
    scopes.set("query_uri", query_uri)?;

    // scopes.parse_query_uri(uri) - query table, or nil and a message
    let parse_query_uri = lua.create_function(|lua, uri: String| match CannedQuery::from_uri(&uri) {
        Ok(query) => Ok((query_to_lua(lua, &query)?, None)),
        Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
    })?;
    scopes.set("parse_query_uri", parse_query_uri)?;

    // scopes.result(category) - a new result in `category`
    let result = lua.create_function(|lua, category: UserDataRef<LuaCategory>| {
        outcome(lua, ResultHandle::new_categorised(&category.0).map(LuaResult))
    })?;
    scopes.set("result", result)?;

    // scopes.department(id, query, label) - "" as id makes a root department
    let department_table = table.clone();
    let department = lua.create_function(move |lua, (id, query, label): (String, LuaValue, String)| {
        let query = query_from_lua(query)?;
        outcome(
            lua,
            DepartmentHandle::new(&department_table, &id, &query, &label).map(LuaDepartment),
        )
    })?;
    scopes.set("department", department)?;

    // scopes.response(status) - e.g. "not_handled", "show_preview"
    let response = lua.create_function(|lua, status: String| {
        let response = status
            .parse::<ActivationStatus>()
            .map_err(|_| RequestError::invalid(format!("unknown activation status '{status}'")))
            .and_then(ActivationResponse::new)
            .map(LuaResponse)
            .map_err(BridgeError::from);
        outcome(lua, response)
    })?;
    scopes.set("response", response)?;

    // scopes.response_for_query(query) - ask the host to run `query`
    let response_for_query = lua.create_function(|_, query: LuaValue| {
        Ok(LuaResponse(ActivationResponse::for_query(query_from_lua(query)?)))
    })?;
    scopes.set("response_for_query", response_for_query)?;

    // scopes.json_encode(value) - non-finite numbers become null
    let json_encode = lua.create_function(|_, value: LuaValue| {
        Ok(codec::encode_string(&lua_to_value(value)?))
    })?;
    scopes.set("json_encode", json_encode)?;

    // scopes.json_decode(text) - value, or nil and a message
    let json_decode = lua.create_function(|lua, text: mlua::String| {
        match codec::decode(&text.as_bytes()) {
            Ok(value) => Ok((value_to_lua(lua, &value)?, None)),
            Err(e) => Ok((LuaValue::Nil, Some(e.to_string()))),
        }
    })?;
    scopes.set("json_decode", json_decode)?;

    add_read_file(lua, &scopes, sandbox, scope_dir)?;

    if sandbox.has_permission(Permission::Environment) {
        // scopes.getenv(name)
        let getenv = lua.create_function(|_, name: String| Ok(std::env::var(name).ok()))?;
        scopes.set("getenv", getenv)?;
    }

    Ok(scopes)
}

fn add_logging(lua: &Lua, scopes: &Table, name: &str) -> mlua::Result<()> {
    let scope = name.to_string();
    let log_debug = lua.create_function(move |_, msg: String| {
        tracing::debug!(target: "scope_script", "[{}] {}", scope, msg);
        Ok(())
    })?;
    scopes.set("log_debug", log_debug)?;

    let scope = name.to_string();
    let log_info = lua.create_function(move |_, msg: String| {
        tracing::info!(target: "scope_script", "[{}] {}", scope, msg);
        Ok(())
    })?;
    scopes.set("log_info", log_info)?;

    let scope = name.to_string();
    let log_warn = lua.create_function(move |_, msg: String| {
        tracing::warn!(target: "scope_script", "[{}] {}", scope, msg);
        Ok(())
    })?;
    scopes.set("log_warn", log_warn)?;

    let scope = name.to_string();
    let log_error = lua.create_function(move |_, msg: String| {
        tracing::error!(target: "scope_script", "[{}] {}", scope, msg);
        Ok(())
    })?;
    scopes.set("log_error", log_error)?;

    Ok(())
}

/// `scopes.read_file(path)`: read a file the sandbox allows, relative to the scope directory.
fn add_read_file(lua: &Lua, scopes: &Table, sandbox: &SandboxConfig, scope_dir: &Path) -> mlua::Result<()> {
    let sandbox = sandbox.clone();
    let scope_dir = scope_dir.to_path_buf();
    let read_file = lua.create_function(move |lua, path: String| {
        let path = resolve(&scope_dir, &path);
        if !sandbox.can_read(&path) {
            return Ok((LuaValue::Nil, Some(format!("reading {} is not permitted", path.display()))));
        }
        let content = match read_limited(&path, sandbox.max_read_size) {
            Ok(Some(content)) => content,
            Ok(None) => {
                return Ok((
                    LuaValue::Nil,
                    Some(format!("{} exceeds {} bytes", path.display(), sandbox.max_read_size)),
                ));
            }
            Err(e) => return Ok((LuaValue::Nil, Some(format!("{}: {}", path.display(), e)))),
        };
        Ok((LuaValue::String(lua.create_string(&content)?), None))
    })?;
    scopes.set("read_file", read_file)
}

/// Read at most `limit` bytes of `path`; `None` when the file is larger.
fn read_limited(path: &Path, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    let limit = u64::try_from(limit).unwrap_or(u64::MAX);
    let file = File::open(path)?;
    if file.metadata()?.len() > limit {
        return Ok(None);
    }
    let mut content = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut content)?;
    if content.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(content))
}

fn resolve(scope_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        scope_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn scopes_for(dir: &Path, sandbox: SandboxConfig) -> (Lua, Table) {
        let lua = Lua::new();
        let table = Arc::new(HandleTable::new());
        let scopes = create_scopes_api(&lua, "weather", &table, &sandbox, dir).unwrap();
        (lua, scopes)
    }

    #[test]
    fn test_read_file_refuses_files_over_limit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("small.txt"), "sunny").unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'x'; 64]).unwrap();

        let mut sandbox = SandboxConfig::default().allow_read(dir.path());
        sandbox.max_read_size = 16;
        let (_lua, scopes) = scopes_for(dir.path(), sandbox);
        let read_file: mlua::Function = scopes.get("read_file").unwrap();

        let (content, err): (Option<String>, Option<String>) = read_file.call("small.txt").unwrap();
        assert_eq!(content.as_deref(), Some("sunny"));
        assert!(err.is_none());

        let (content, err): (Option<String>, Option<String>) = read_file.call("big.txt").unwrap();
        assert!(content.is_none());
        assert!(err.unwrap().contains("exceeds 16 bytes"));
    }

    #[test]
    fn test_read_limited_at_exact_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("towns.json");
        std::fs::write(&path, "[1,2]").unwrap();
        assert_eq!(read_limited(&path, 5).unwrap().unwrap(), b"[1,2]");
        assert!(read_limited(&path, 4).unwrap().is_none());
        assert!(read_limited(&dir.path().join("missing"), 5).is_err());
    }

    #[test]
    fn test_read_file_outside_sandbox() {
        let dir = TempDir::new().unwrap();
        let (_lua, scopes) = scopes_for(dir.path(), SandboxConfig::default());
        let read_file: mlua::Function = scopes.get("read_file").unwrap();
        let (content, err): (Option<String>, Option<String>) = read_file.call("/etc/hostname").unwrap();
        assert!(content.is_none());
        assert!(err.unwrap().contains("not permitted"));
    }
}
