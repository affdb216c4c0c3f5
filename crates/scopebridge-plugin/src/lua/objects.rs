//! Bridge objects exposed to Lua as userdata.
//!
//! Methods that can fail return `true` (or the produced object) on success
//! and `nil, message` on failure, so scripts can react to a closed reply
//! without raising.

use std::sync::Arc;
use std::time::Duration;

use mlua::{IntoLua, Lua, UserData, UserDataMethods, UserDataRef, Value as LuaValue};
use scopebridge_core::{
    ActivationResponse, BridgeError, BridgeResult, CannedQuery, ColumnLayout, Filter,
    FilterState, PreviewWidget, RequestError, Value, codec,
};
use scopebridge_host::{
    CancelObserver, CategoryHandle, DepartmentHandle, PreviewReply, ResultHandle, ScopeBase,
    ScopeMetadataHandle, SearchReply,
};

use super::convert::{lua_to_value, value_to_lua};

/// Lua results of fallible calls: the value, or nil and a message.
pub(crate) type Outcome = (LuaValue, Option<String>);

pub(crate) fn outcome<T: IntoLua>(lua: &Lua, result: BridgeResult<T>) -> mlua::Result<Outcome> {
    match result {
        Ok(value) => Ok((value.into_lua(lua)?, None)),
        Err(e) => Ok((LuaValue::Nil, Some(e.boundary_message()))),
    }
}

fn done(lua: &Lua, result: BridgeResult<()>) -> mlua::Result<Outcome> {
    outcome(lua, result.map(|()| true))
}

/// Parse a query table (`scope_id`, `query_string`, `department_id`, `filter_state`).
pub(crate) fn query_from_lua(value: LuaValue) -> mlua::Result<CannedQuery> {
    CannedQuery::from_value(&lua_to_value(value)?).map_err(mlua::Error::external)
}

pub(crate) fn query_to_lua(lua: &Lua, query: &CannedQuery) -> mlua::Result<LuaValue> {
    value_to_lua(lua, &query.to_value())
}

/// One layout table: `{ num_columns = n, columns = { {ids...}, ... } }`.
fn layout_from_value(value: &Value) -> BridgeResult<ColumnLayout> {
    let columns = value
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| RequestError::invalid("column layout needs a 'columns' array"))?;
    let num_columns = match value.get("num_columns") {
        Some(n) => n
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| RequestError::invalid("'num_columns' must be a positive integer"))?,
        None => columns.len(),
    };
    if columns.len() > num_columns {
        return Err(RequestError::TooManyColumns {
            capacity: num_columns,
        }
        .into());
    }

    let mut layout = ColumnLayout::new(num_columns);
    for column in columns {
        let ids = column
            .as_array()
            .ok_or_else(|| RequestError::invalid("each column must be an array of widget ids"))?
            .iter()
            .map(|id| {
                id.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RequestError::invalid("widget ids must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        layout.add_column(ids)?;
    }
    Ok(layout)
}

/// A single widget table, or an array of them.
fn widgets_from_value(value: &Value) -> BridgeResult<Vec<PreviewWidget>> {
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .map(PreviewWidget::from_value)
            .collect::<Result<_, _>>()?),
        other => Ok(vec![PreviewWidget::from_value(other)?]),
    }
}

pub struct LuaSearchReply(pub SearchReply);

impl UserData for LuaSearchReply {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // reply:register_category(id, title, icon?, template?)
        methods.add_method(
            "register_category",
            |lua, this, (id, title, icon, template): (String, String, Option<String>, Option<String>)| {
                let category = this.0.register_category(
                    &id,
                    &title,
                    icon.as_deref().unwrap_or_default(),
                    template.as_deref().unwrap_or_default(),
                );
                outcome(lua, category.map(LuaCategory))
            },
        );

        methods.add_method("register_departments", |lua, this, root: UserDataRef<LuaDepartment>| {
            done(lua, this.0.register_departments(&root.0))
        });

        methods.add_method("push", |lua, this, result: UserDataRef<LuaResult>| {
            done(lua, this.0.push(&result.0))
        });

        // reply:push_filters(filters, state?) with filters as plain tables
        methods.add_method(
            "push_filters",
            |lua, this, (filters, state): (LuaValue, Option<LuaValue>)| {
                let filters: Vec<Filter> = match codec::from_value(&lua_to_value(filters)?) {
                    Ok(filters) => filters,
                    Err(e) => return done(lua, Err(e.into())),
                };
                let state: FilterState = match state.map(lua_to_value).transpose()? {
                    Some(Value::Object(state)) => state,
                    None | Some(Value::Null) => FilterState::new(),
                    Some(_) => {
                        return done(lua, Err(RequestError::invalid("filter state must be a table").into()));
                    }
                };
                done(lua, this.0.push_filters(&filters, &state))
            },
        );

        methods.add_method("finished", |lua, this, ()| done(lua, this.0.finished()));

        methods.add_method("error", |lua, this, message: String| {
            done(lua, this.0.error(&message))
        });

        methods.add_method("state", |lua, this, ()| {
            outcome(lua, this.0.state().map(|s| s.as_str()))
        });
    }
}

pub struct LuaPreviewReply(pub PreviewReply);

impl UserData for LuaPreviewReply {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // reply:register_layout({ {num_columns = 1, columns = {{"a", "b"}}}, ... })
        methods.add_method("register_layout", |lua, this, layouts: LuaValue| {
            let layouts = match lua_to_value(layouts)? {
                Value::Array(items) => items.iter().map(layout_from_value).collect(),
                other => layout_from_value(&other).map(|layout| vec![layout]),
            };
            done(lua, layouts.and_then(|layouts| this.0.register_layout(&layouts)))
        });

        methods.add_method("push_widgets", |lua, this, widgets: LuaValue| {
            let widgets = widgets_from_value(&lua_to_value(widgets)?);
            done(lua, widgets.and_then(|widgets| this.0.push_widgets(&widgets)))
        });

        methods.add_method("push_attr", |lua, this, (key, value): (String, LuaValue)| {
            done(lua, this.0.push_attr(&key, lua_to_value(value)?))
        });

        methods.add_method("finished", |lua, this, ()| done(lua, this.0.finished()));

        methods.add_method("error", |lua, this, message: String| {
            done(lua, this.0.error(&message))
        });

        methods.add_method("state", |lua, this, ()| {
            outcome(lua, this.0.state().map(|s| s.as_str()))
        });
    }
}

pub struct LuaResult(pub ResultHandle);

impl UserData for LuaResult {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("get", |lua, this, key: String| match this.0.get(&key) {
            Ok(value) => Ok((value_to_lua(lua, &value)?, None)),
            Err(e) => Ok((LuaValue::Nil, Some(e.boundary_message()))),
        });

        methods.add_method("set", |lua, this, (key, value): (String, LuaValue)| {
            done(lua, this.0.set(&key, lua_to_value(value)?))
        });

        methods.add_method("uri", |lua, this, ()| outcome(lua, this.0.uri()));
        methods.add_method("title", |lua, this, ()| outcome(lua, this.0.title()));
        methods.add_method("art", |lua, this, ()| outcome(lua, this.0.art()));
        methods.add_method("dnd_uri", |lua, this, ()| outcome(lua, this.0.dnd_uri()));

        methods.add_method("set_intercept_activation", |lua, this, ()| {
            done(lua, this.0.set_intercept_activation())
        });

        methods.add_method("to_table", |lua, this, ()| match this.0.snapshot() {
            Ok(result) => Ok((value_to_lua(lua, &result.to_value())?, None)),
            Err(e) => Ok((LuaValue::Nil, Some(e.boundary_message()))),
        });
    }
}

pub struct LuaCategory(pub CategoryHandle);

impl UserData for LuaCategory {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("id", |lua, this, ()| {
            outcome(lua, this.0.category().map(|c| c.id().to_string()).map_err(BridgeError::from))
        });

        methods.add_method("title", |lua, this, ()| {
            outcome(lua, this.0.category().map(|c| c.title().to_string()).map_err(BridgeError::from))
        });

        methods.add_method("icon", |lua, this, ()| {
            outcome(lua, this.0.category().map(|c| c.icon().to_string()).map_err(BridgeError::from))
        });
    }
}

pub struct LuaDepartment(pub DepartmentHandle);

impl UserData for LuaDepartment {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("id", |lua, this, ()| outcome(lua, this.0.id()));
        methods.add_method("label", |lua, this, ()| outcome(lua, this.0.label()));

        methods.add_method("alternate_label", |lua, this, ()| {
            outcome(lua, this.0.alternate_label())
        });

        methods.add_method("set_alternate_label", |lua, this, label: String| {
            done(lua, this.0.set_alternate_label(&label))
        });

        methods.add_method("has_subdepartments", |lua, this, ()| {
            outcome(lua, this.0.has_subdepartments())
        });

        methods.add_method("set_has_subdepartments", |lua, this, has: bool| {
            done(lua, this.0.set_has_subdepartments(has))
        });

        methods.add_method("add_subdepartment", |lua, this, child: UserDataRef<LuaDepartment>| {
            done(lua, this.0.add_subdepartment(&child.0))
        });

        methods.add_method(
            "set_subdepartments",
            |lua, this, children: Vec<UserDataRef<LuaDepartment>>| {
                let children = children
                    .iter()
                    .map(|child| child.0.try_clone())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(BridgeError::from);
                done(lua, children.and_then(|children| this.0.set_subdepartments(&children)))
            },
        );

        methods.add_method("subdepartments", |lua, this, ()| {
            let children = this
                .0
                .subdepartments()
                .map(|children| children.into_iter().map(LuaDepartment).collect::<Vec<_>>());
            outcome(lua, children)
        });
    }
}

pub struct LuaCancel(pub CancelObserver);

impl UserData for LuaCancel {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("is_cancelled", |_, this, ()| Ok(this.0.is_cancelled()));

        // cancel:wait(ms) - block until cancelled or the timeout passes
        methods.add_method("wait", |_, this, ms: u64| {
            Ok(this.0.wait_timeout(Duration::from_millis(ms)))
        });
    }
}

pub struct LuaScopeBase(pub Arc<ScopeBase>);

impl UserData for LuaScopeBase {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("scope_id", |_, this, ()| Ok(this.0.scope_id().to_string()));

        methods.add_method("scope_directory", |_, this, ()| {
            Ok(this.0.scope_directory().to_string_lossy().into_owned())
        });

        methods.add_method("cache_directory", |_, this, ()| {
            Ok(this.0.cache_directory().to_string_lossy().into_owned())
        });

        methods.add_method("tmp_directory", |_, this, ()| {
            Ok(this.0.tmp_directory().to_string_lossy().into_owned())
        });

        methods.add_method("settings", |lua, this, ()| value_to_lua(lua, &this.0.settings()));

        methods.add_method("registry", |lua, this, ()| {
            let scopes = this
                .0
                .list_registry_scopes()
                .map(|scopes| scopes.into_iter().map(LuaScopeMetadata).collect::<Vec<_>>());
            outcome(lua, scopes)
        });
    }
}

pub struct LuaScopeMetadata(pub ScopeMetadataHandle);

impl UserData for LuaScopeMetadata {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("scope_id", |lua, this, ()| {
            outcome(lua, this.0.metadata().map(|m| m.scope_id.clone()).map_err(BridgeError::from))
        });

        methods.add_method("display_name", |lua, this, ()| {
            outcome(lua, this.0.metadata().map(|m| m.display_name.clone()).map_err(BridgeError::from))
        });

        methods.add_method("to_table", |lua, this, ()| match this.0.metadata() {
            Ok(metadata) => Ok((value_to_lua(lua, &metadata.to_value())?, None)),
            Err(e) => Ok((LuaValue::Nil, Some(BridgeError::from(e).boundary_message()))),
        });
    }
}

/// An activation response under construction.
pub struct LuaResponse(pub ActivationResponse);

impl UserData for LuaResponse {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("status", |_, this, ()| Ok(this.0.status().to_string()));

        methods.add_method_mut("set_scope_data", |_, this, data: LuaValue| {
            this.0.set_scope_data(lua_to_value(data)?);
            Ok(())
        });

        methods.add_method("query", |lua, this, ()| match this.0.query() {
            Some(query) => query_to_lua(lua, query),
            None => Ok(LuaValue::Nil),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_from_value() {
        let value = Value::Object(
            [
                ("num_columns".to_string(), Value::Integer(2)),
                (
                    "columns".to_string(),
                    Value::Array(vec![
                        Value::Array(vec![Value::from("a")]),
                        Value::Array(vec![Value::from("b"), Value::from("c")]),
                    ]),
                ),
            ]
            .into(),
        );
        let layout = layout_from_value(&value).unwrap();
        assert_eq!(layout.number_of_columns(), 2);
        assert_eq!(layout.column(1).unwrap(), ["b", "c"]);
    }

    fn layout_table(num_columns: i64, columns: usize) -> Value {
        let columns = (0..columns)
            .map(|i| Value::Array(vec![Value::from(format!("w{i}"))]))
            .collect();
        Value::Object(
            [
                ("num_columns".to_string(), Value::Integer(num_columns)),
                ("columns".to_string(), Value::Array(columns)),
            ]
            .into(),
        )
    }

    #[test]
    fn test_oversized_column_count_is_request_error() {
        let layout = layout_from_value(&layout_table(i64::MAX, 1)).unwrap();
        assert!(layout.validate().unwrap_err().to_string().contains("columns"));

        let layout = layout_from_value(&layout_table(1 << 42, 2)).unwrap();
        assert_eq!(layout.size(), 2);

        let err = layout_from_value(&layout_table(-1, 1)).unwrap_err();
        assert!(err.is_request_error());
    }

    #[test]
    fn test_more_columns_than_declared_is_rejected() {
        let err = layout_from_value(&layout_table(1, 3)).unwrap_err();
        assert!(err.is_request_error());
        assert!(err.to_string().contains("room for 1"));
    }

    #[test]
    fn test_layout_without_columns_is_rejected() {
        let err = layout_from_value(&Value::object()).unwrap_err();
        assert!(err.is_request_error());
    }

    #[test]
    fn test_widgets_from_single_table() {
        let widget = PreviewWidget::new("header", "header");
        let widgets = widgets_from_value(&widget.to_value()).unwrap();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0].id(), "header");
    }
}
