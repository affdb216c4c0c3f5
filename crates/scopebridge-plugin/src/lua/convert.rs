//! Conversion between Lua values and bridge values.

use std::collections::BTreeMap;

use mlua::{Lua, Table, Value as LuaValue};
use scopebridge_core::Value;

/// Nesting depth beyond which a table is assumed to be cyclic.
const MAX_DEPTH: usize = 64;

/// Convert a Lua value to a bridge value.
///
/// Tables whose keys are exactly `1..=n` become arrays; every other table
/// becomes an object with stringified keys. An empty table is an empty object.
pub fn lua_to_value(value: LuaValue) -> mlua::Result<Value> {
    to_value(value, 0)
}

fn to_value(value: LuaValue, depth: usize) -> mlua::Result<Value> {
    match value {
        LuaValue::Nil => Ok(Value::Null),
        LuaValue::Boolean(b) => Ok(Value::Bool(b)),
        LuaValue::Integer(i) => Ok(Value::Integer(i)),
        LuaValue::Number(n) => Ok(Value::Float(n)),
        LuaValue::String(s) => Ok(Value::String(s.to_string_lossy())),
        LuaValue::Table(t) => {
            if depth >= MAX_DEPTH {
                return Err(mlua::Error::runtime("table nesting too deep (cyclic table?)"));
            }
            table_to_value(t, depth + 1)
        }
        other => Err(mlua::Error::runtime(format!(
            "cannot pass a {} across the bridge",
            other.type_name()
        ))),
    }
}

fn table_to_value(table: Table, depth: usize) -> mlua::Result<Value> {
    let len = table.raw_len();
    let mut count = 0usize;
    for pair in table.pairs::<LuaValue, LuaValue>() {
        pair?;
        count += 1;
    }

    if len > 0 && len == count {
        let mut items = Vec::with_capacity(len);
        for item in table.sequence_values::<LuaValue>() {
            items.push(to_value(item?, depth)?);
        }
        return Ok(Value::Array(items));
    }

    let mut object = BTreeMap::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        let key = match key {
            LuaValue::String(s) => s.to_string_lossy(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            LuaValue::Boolean(b) => b.to_string(),
            other => {
                return Err(mlua::Error::runtime(format!(
                    "cannot use a {} as an object key",
                    other.type_name()
                )));
            }
        };
        object.insert(key, to_value(value, depth)?);
    }
    Ok(Value::Object(object))
}

/// Convert a bridge value to a Lua value. Null becomes nil.
pub fn value_to_lua(lua: &Lua, value: &Value) -> mlua::Result<LuaValue> {
    match value {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Integer(i) => Ok(LuaValue::Integer(*i)),
        Value::Float(f) => Ok(LuaValue::Number(*f)),
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, value_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        Value::Object(object) => {
            let table = lua.create_table_with_capacity(0, object.len())?;
            for (key, item) in object {
                table.raw_set(key.as_str(), value_to_lua(lua, item)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(lua: &Lua, code: &str) -> Value {
        lua_to_value(lua.load(code).eval::<LuaValue>().unwrap()).unwrap()
    }

    #[test]
    fn test_sequence_becomes_array() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "return {1, 'two', true}"),
            Value::Array(vec![Value::Integer(1), Value::from("two"), Value::Bool(true)])
        );
    }

    #[test]
    fn test_mixed_table_becomes_object() {
        let lua = Lua::new();
        let value = eval(&lua, "return {10, name = 'x'}");
        assert_eq!(value.get("1"), Some(&Value::Integer(10)));
        assert_eq!(value.get("name"), Some(&Value::from("x")));
        assert_eq!(eval(&lua, "return {}"), Value::object());
    }

    #[test]
    fn test_functions_are_rejected() {
        let lua = Lua::new();
        let value = lua.load("return {f = function() end}").eval::<LuaValue>().unwrap();
        assert!(lua_to_value(value).is_err());
    }

    #[test]
    fn test_cyclic_table_is_rejected() {
        let lua = Lua::new();
        let value = lua.load("local t = {}; t.self = t; return t").eval::<LuaValue>().unwrap();
        assert!(lua_to_value(value).is_err());
    }

    #[test]
    fn test_value_to_lua() {
        let lua = Lua::new();
        let value = Value::Array(vec![Value::from("a"), Value::Float(1.5)]);
        lua.globals().set("v", value_to_lua(&lua, &value).unwrap()).unwrap();
        let (first, second): (String, f64) = lua.load("return v[1], v[2]").eval().unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, 1.5);
    }
}
