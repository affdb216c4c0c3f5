//! Reply and registration marshaling.
//!
//! Entry points here take handle slots and length-delimited byte spans, the
//! form in which calls arrive from an embedding runtime. Structured payloads
//! are boundary JSON. Failures are returned as [`BridgeError`] values and
//! never unwind.

use std::sync::Arc;

use scopebridge_core::{
    BridgeResult, CannedQuery, Category, ColumnLayout, DecodeError, Department, Filter,
    FilterState, HandleSlot, HandleTable, PreviewWidget, ScopeResult, Shared, Value, codec,
};

use crate::native::{NativePreviewReply, NativeSearchReply};

/// Interpret a byte span as UTF-8 text.
pub fn boundary_str(bytes: &[u8]) -> Result<&str, DecodeError> {
    Ok(std::str::from_utf8(bytes)?)
}

pub fn search_reply_finished(table: &HandleTable, reply: &HandleSlot) -> BridgeResult<()> {
    table.get::<NativeSearchReply>(reply)?.finished()?;
    Ok(())
}

pub fn search_reply_error(table: &HandleTable, reply: &HandleSlot, message: &[u8]) -> BridgeResult<()> {
    let message = String::from_utf8_lossy(message);
    table.get::<NativeSearchReply>(reply)?.error(&message)?;
    Ok(())
}

/// Register a category and write its handle into `category_out`.
pub fn search_reply_register_category(
    table: &HandleTable,
    reply: &HandleSlot,
    id: &[u8],
    title: &[u8],
    icon: &[u8],
    template: &[u8],
    category_out: &mut HandleSlot,
) -> BridgeResult<()> {
    let reply = table.get::<NativeSearchReply>(reply)?;
    let category = Category::new(
        boundary_str(id)?,
        boundary_str(title)?,
        boundary_str(icon)?,
        boundary_str(template)?,
    )?;
    let category = reply.register_category(Arc::new(category))?;
    table.insert(category_out, category)?;
    Ok(())
}

pub fn search_reply_register_departments(
    table: &HandleTable,
    reply: &HandleSlot,
    department: &HandleSlot,
) -> BridgeResult<()> {
    let root = table.get::<Shared<Department>>(department)?;
    table.get::<NativeSearchReply>(reply)?.register_departments(&root)
}

pub fn search_reply_push(table: &HandleTable, reply: &HandleSlot, result: &HandleSlot) -> BridgeResult<()> {
    let result = table.get::<Shared<ScopeResult>>(result)?;
    let snapshot = result.snapshot();
    table.get::<NativeSearchReply>(reply)?.push(&snapshot)
}

/// Push filter definitions (a JSON array) with the current state (a JSON object).
pub fn search_reply_push_filters(
    table: &HandleTable,
    reply: &HandleSlot,
    filters_json: &[u8],
    state_json: &[u8],
) -> BridgeResult<()> {
    let reply = table.get::<NativeSearchReply>(reply)?;
    let filters: Vec<Filter> = codec::decode_typed(filters_json)?;
    let state = match codec::decode(state_json)? {
        Value::Object(state) => state,
        Value::Null => FilterState::new(),
        other => return Err(DecodeError::shape("filter state object", other.type_name()).into()),
    };
    reply.push_filters(&filters, &state)
}

pub fn preview_reply_finished(table: &HandleTable, reply: &HandleSlot) -> BridgeResult<()> {
    table.get::<NativePreviewReply>(reply)?.finished()?;
    Ok(())
}

pub fn preview_reply_error(table: &HandleTable, reply: &HandleSlot, message: &[u8]) -> BridgeResult<()> {
    let message = String::from_utf8_lossy(message);
    table.get::<NativePreviewReply>(reply)?.error(&message)?;
    Ok(())
}

/// Register column layouts, each a JSON object `{num_columns, columns}`.
pub fn preview_reply_register_layout(
    table: &HandleTable,
    reply: &HandleSlot,
    layouts_json: &[u8],
) -> BridgeResult<()> {
    let reply = table.get::<NativePreviewReply>(reply)?;
    let layouts: Vec<ColumnLayout> = codec::decode_typed(layouts_json)?;
    reply.register_layout(&layouts)
}

/// Push widgets, each one JSON object.
pub fn preview_reply_push_widgets(
    table: &HandleTable,
    reply: &HandleSlot,
    widgets_json: &[&[u8]],
) -> BridgeResult<()> {
    let reply = table.get::<NativePreviewReply>(reply)?;
    let widgets = widgets_json
        .iter()
        .map(|bytes| PreviewWidget::from_value(&codec::decode(bytes)?))
        .collect::<Result<Vec<_>, DecodeError>>()?;
    reply.push_widgets(&widgets)
}

pub fn preview_reply_push_attr(
    table: &HandleTable,
    reply: &HandleSlot,
    key: &[u8],
    value_json: &[u8],
) -> BridgeResult<()> {
    let reply = table.get::<NativePreviewReply>(reply)?;
    reply.push_attribute(boundary_str(key)?, codec::decode(value_json)?)
}

/// Create a result in `category` and write its handle into `result_out`.
pub fn new_categorised_result(
    table: &HandleTable,
    category: &HandleSlot,
    result_out: &mut HandleSlot,
) -> BridgeResult<()> {
    let category = table.get::<Category>(category)?;
    table.insert(result_out, ScopeResult::categorised(category).into_shared())?;
    Ok(())
}

/// Read a result attribute as boundary JSON.
pub fn result_get_attr(table: &HandleTable, result: &HandleSlot, key: &[u8]) -> BridgeResult<Vec<u8>> {
    let result = table.get::<Shared<ScopeResult>>(result)?;
    let key = boundary_str(key)?;
    let guard = result.read();
    Ok(codec::encode(guard.get(key)?))
}

pub fn result_set_attr(
    table: &HandleTable,
    result: &HandleSlot,
    key: &[u8],
    value_json: &[u8],
) -> BridgeResult<()> {
    let result = table.get::<Shared<ScopeResult>>(result)?;
    let key = boundary_str(key)?;
    let value = codec::decode(value_json)?;
    result.write().set(key, value);
    Ok(())
}

pub fn result_set_intercept_activation(table: &HandleTable, result: &HandleSlot) -> BridgeResult<()> {
    table
        .get::<Shared<ScopeResult>>(result)?
        .write()
        .set_intercept_activation();
    Ok(())
}

/// Create a department and write its handle into `department_out`.
///
/// `query_json` is the structured form of the query it navigates to.
pub fn new_department(
    table: &HandleTable,
    id: &[u8],
    query_json: &[u8],
    label: &[u8],
    department_out: &mut HandleSlot,
) -> BridgeResult<()> {
    let query = CannedQuery::from_value(&codec::decode(query_json)?)?;
    let department = Department::new(boundary_str(id)?, &query, boundary_str(label)?)?;
    table.insert(department_out, department.into_shared())?;
    Ok(())
}

pub fn department_add_subdepartment(
    table: &HandleTable,
    department: &HandleSlot,
    child: &HandleSlot,
) -> BridgeResult<()> {
    let parent = table.get::<Shared<Department>>(department)?;
    let child = table.get::<Shared<Department>>(child)?;
    parent.add_subdepartment(child)?;
    Ok(())
}

/// Replace a department's children with the departments behind `children`.
pub fn department_set_subdepartments<'a>(
    table: &HandleTable,
    department: &HandleSlot,
    children: impl IntoIterator<Item = &'a HandleSlot>,
) -> BridgeResult<()> {
    let parent = table.get::<Shared<Department>>(department)?;
    let children = children
        .into_iter()
        .map(|slot| table.get::<Shared<Department>>(slot))
        .collect::<Result<Vec<_>, _>>()?;
    parent.set_subdepartments(children)?;
    Ok(())
}

/// New handles to a department's children, one slot per child.
///
/// The caller owns the returned slots and must destroy each.
pub fn department_subdepartments(
    table: &HandleTable,
    department: &HandleSlot,
) -> BridgeResult<Vec<HandleSlot>> {
    let parent = table.get::<Shared<Department>>(department)?;
    let children: Vec<_> = parent.read().subdepartments().to_vec();
    let mut slots = Vec::with_capacity(children.len());
    for child in children {
        let mut slot = HandleSlot::empty();
        if let Err(e) = table.insert(&mut slot, child) {
            for mut made in slots {
                let _ = table.destroy(&mut made);
            }
            return Err(e.into());
        }
        slots.push(slot);
    }
    Ok(slots)
}
