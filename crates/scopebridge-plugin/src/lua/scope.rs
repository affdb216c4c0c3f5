//! A scope implemented by a Lua module table.

use std::sync::Arc;

use mlua::{FromLuaMulti, Function, IntoLuaMulti, Lua, RegistryKey, Table, Value as LuaValue};
use scopebridge_core::{
    ActionMetadata, ActivationResponse, ActivationStatus, BridgeError, BridgeResult, CannedQuery,
    HandleTable, RequestError, SearchMetadata, codec,
};
use scopebridge_host::{
    ActionPerformer, Activator, CancelObserver, PreviewReply, ResultHandle, Scope, ScopeBase,
    SearchReply,
};

use super::convert::{lua_to_value, value_to_lua};
use super::objects::{LuaCancel, LuaPreviewReply, LuaResponse, LuaResult, LuaScopeBase, LuaSearchReply};

/// Script functions a module may define, besides `search` and `preview`.
const ACTIVATE: &str = "activate";
const PERFORM_ACTION: &str = "perform_action";

/// A loaded Lua scope.
///
/// Each scope owns its Lua state; callbacks into it run one at a time.
pub struct LuaScope {
    name: String,
    lua: Lua,
    module: RegistryKey,
    table: Arc<HandleTable>,
    has_activate: bool,
    has_perform_action: bool,
}

impl std::fmt::Debug for LuaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaScope")
            .field("name", &self.name)
            .field("has_activate", &self.has_activate)
            .field("has_perform_action", &self.has_perform_action)
            .finish()
    }
}

impl LuaScope {
    pub(crate) fn new(name: &str, lua: Lua, module: Table, table: Arc<HandleTable>) -> mlua::Result<Self> {
        let has_activate = module.contains_key(ACTIVATE)?;
        let has_perform_action = module.contains_key(PERFORM_ACTION)?;
        let module = lua.create_registry_value(module)?;
        Ok(Self {
            name: name.to_string(),
            lua,
            module,
            table,
            has_activate,
            has_perform_action,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call `function` from the module if it is defined.
    ///
    /// Handles passed into the call are collected before returning.
    fn call<R: FromLuaMulti>(&self, function: &str, args: impl IntoLuaMulti) -> BridgeResult<Option<R>> {
        let result = self.call_inner(function, args);
        if let Err(e) = self.lua.gc_collect() {
            tracing::warn!(target: "scope", "{}: collection after {} failed: {}", self.name, function, e);
        }
        result.map_err(|e| script_error(function, &e))
    }

    fn call_inner<R: FromLuaMulti>(&self, function: &str, args: impl IntoLuaMulti) -> mlua::Result<Option<R>> {
        let module: Table = self.lua.registry_value(&self.module)?;
        match module.get::<Option<Function>>(function)? {
            Some(func) => func.call::<R>(args).map(Some),
            None => Ok(None),
        }
    }

    fn metadata_arg<T: serde::Serialize>(&self, metadata: &T) -> BridgeResult<LuaValue> {
        let value = codec::to_value(metadata)?;
        value_to_lua(&self.lua, &value).map_err(|e| script_error("metadata", &e))
    }

    fn result_arg(&self, result: &ResultHandle) -> BridgeResult<LuaResult> {
        Ok(LuaResult(result.try_clone()?))
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }
}

/// The first line of a Lua error; tracebacks stay in the debug log.
fn script_error(function: &str, e: &mlua::Error) -> BridgeError {
    let text = e.to_string();
    tracing::debug!(target: "scope", "{} raised: {}", function, text);
    let message = text.lines().next().unwrap_or_default().trim();
    let message = message.strip_prefix("runtime error: ").unwrap_or(message);
    BridgeError::scope(message)
}

fn response_from_lua(value: LuaValue) -> BridgeResult<ActivationResponse> {
    match value {
        LuaValue::Nil => Ok(ActivationResponse::not_handled()),
        LuaValue::UserData(ud) => {
            let response = ud
                .borrow::<LuaResponse>()
                .map_err(|_| RequestError::invalid("activation must return a response"))?;
            Ok(response.0.clone())
        }
        LuaValue::String(status) => {
            let status = status.to_string_lossy();
            let status: ActivationStatus = status
                .parse()
                .map_err(|_| RequestError::invalid(format!("unknown activation status '{status}'")))?;
            Ok(ActivationResponse::new(status)?)
        }
        other => {
            let value = lua_to_value(other).map_err(|e| script_error("activation response", &e))?;
            Ok(ActivationResponse::from_value(&value)?)
        }
    }
}

impl Scope for LuaScope {
    fn start(&self, base: &Arc<ScopeBase>) -> BridgeResult<()> {
        self.call::<()>("start", LuaScopeBase(base.clone()))?;
        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = self.call::<()>("stop", ()) {
            tracing::warn!(target: "scope", "{}: stop failed: {}", self.name, e);
        }
    }

    fn search(
        &self,
        query: &CannedQuery,
        metadata: &SearchMetadata,
        reply: &SearchReply,
        cancel: &CancelObserver,
    ) -> BridgeResult<()> {
        let query = value_to_lua(&self.lua, &query.to_value()).map_err(|e| script_error("query", &e))?;
        let args = (
            query,
            self.metadata_arg(metadata)?,
            LuaSearchReply(reply.try_clone()?),
            LuaCancel(cancel.clone()),
        );
        match self.call::<()>("search", args)? {
            Some(()) => Ok(()),
            None => Err(BridgeError::scope(format!("scope '{}' defines no search function", self.name))),
        }
    }

    fn preview(
        &self,
        result: &ResultHandle,
        metadata: &ActionMetadata,
        reply: &PreviewReply,
        cancel: &CancelObserver,
    ) -> BridgeResult<()> {
        let args = (
            self.result_arg(result)?,
            self.metadata_arg(metadata)?,
            LuaPreviewReply(reply.try_clone()?),
            LuaCancel(cancel.clone()),
        );
        match self.call::<()>("preview", args)? {
            Some(()) => Ok(()),
            None => Err(BridgeError::scope(format!("scope '{}' defines no preview function", self.name))),
        }
    }

    fn activator(&self) -> Option<&dyn Activator> {
        self.has_activate.then_some(self as &dyn Activator)
    }

    fn action_performer(&self) -> Option<&dyn ActionPerformer> {
        self.has_perform_action.then_some(self as &dyn ActionPerformer)
    }
}

impl Activator for LuaScope {
    fn activate(&self, result: &ResultHandle, metadata: &ActionMetadata) -> BridgeResult<ActivationResponse> {
        let args = (self.result_arg(result)?, self.metadata_arg(metadata)?);
        let returned = self.call::<LuaValue>(ACTIVATE, args)?.unwrap_or(LuaValue::Nil);
        response_from_lua(returned)
    }
}

impl ActionPerformer for LuaScope {
    fn perform_action(
        &self,
        result: &ResultHandle,
        metadata: &ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> BridgeResult<ActivationResponse> {
        let args = (
            self.result_arg(result)?,
            self.metadata_arg(metadata)?,
            widget_id.to_string(),
            action_id.to_string(),
        );
        let returned = self.call::<LuaValue>(PERFORM_ACTION, args)?.unwrap_or(LuaValue::Nil);
        response_from_lua(returned)
    }
}
