//! C ABI over the process-wide handle table.
//!
//! Handle slots cross as two `u64` words. Strings and payloads cross as
//! pointer and length spans. Fallible entry points return `false` (or null)
//! and write an owned, nul-terminated message into `error_out`; the caller
//! releases it with [`sb_string_free`]. Owned byte buffers are released with
//! [`sb_bytes_free`], slot arrays with [`sb_slots_free`]. No panic unwinds
//! across these functions.

use std::ffi::{CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;

use scopebridge_core::{BridgeError, BridgeResult, DecodeError, HandleSlot, HandleTable, codec};

use crate::marshal;

/// Out-parameter receiving an error message, or null when not wanted.
pub type ErrorOut = *mut *mut c_char;

fn owned_c_string(message: &str) -> *mut c_char {
    let cleaned = message.replace('\0', " ");
    CString::new(cleaned).map_or(ptr::null_mut(), CString::into_raw)
}

/// Run `f`, turning errors and panics into an error message.
///
/// # Safety
/// `error_out` must be null or valid for writes.
unsafe fn guarded<T>(error_out: ErrorOut, fallback: T, f: impl FnOnce() -> BridgeResult<T>) -> T {
    let message = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return value,
        Ok(Err(e)) => e.boundary_message(),
        Err(_) => "panic inside the bridge".to_string(),
    };
    tracing::debug!(target: "bridge", "boundary call failed: {}", message);
    if !error_out.is_null() {
        // SAFETY: the caller guarantees `error_out` is writable.
        unsafe { *error_out = owned_c_string(&message) };
    }
    fallback
}

/// # Safety
/// `data` must be null with `len == 0`, or valid for `len` bytes.
unsafe fn span<'a>(data: *const u8, len: usize) -> BridgeResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(DecodeError::shape("byte span", "null pointer").into());
    }
    // SAFETY: non-null and the caller guarantees `len` readable bytes.
    Ok(unsafe { std::slice::from_raw_parts(data, len) })
}

/// # Safety
/// `slot` must be null or point to a valid slot.
unsafe fn slot_ref<'a>(slot: *const HandleSlot) -> BridgeResult<&'a HandleSlot> {
    // SAFETY: the caller guarantees validity when non-null.
    unsafe { slot.as_ref() }.ok_or_else(|| BridgeError::scope("null handle slot"))
}

/// # Safety
/// `slot` must be null or point to a valid, writable slot.
unsafe fn slot_mut<'a>(slot: *mut HandleSlot) -> BridgeResult<&'a mut HandleSlot> {
    // SAFETY: the caller guarantees validity when non-null.
    unsafe { slot.as_mut() }.ok_or_else(|| BridgeError::scope("null handle slot"))
}

/// Hand out an owned buffer; its length goes to `len_out`.
///
/// # Safety
/// `len_out` must be valid for writes.
unsafe fn owned_bytes(bytes: Vec<u8>, len_out: *mut usize) -> BridgeResult<*mut u8> {
    if len_out.is_null() {
        return Err(BridgeError::scope("null length out-parameter"));
    }
    let boxed = bytes.into_boxed_slice();
    // SAFETY: checked non-null above.
    unsafe { *len_out = boxed.len() };
    Ok(Box::into_raw(boxed).cast::<u8>())
}

/// Initialize the empty slot `dest` as another reference to `source`.
///
/// # Safety
/// Slot pointers must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_handle_copy(
    dest: *mut HandleSlot,
    source: *const HandleSlot,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            HandleTable::global().copy(slot_mut(dest)?, slot_ref(source)?)?;
            Ok(true)
        })
    }
}

/// Release a slot's reference and zero it. Zeroed slots are ignored.
///
/// # Safety
/// `slot` must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_handle_destroy(slot: *mut HandleSlot, error_out: ErrorOut) -> bool {
    unsafe {
        guarded(error_out, false, || {
            HandleTable::global().destroy(slot_mut(slot)?)?;
            Ok(true)
        })
    }
}

/// # Safety
/// `slot` must be null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_handle_is_empty(slot: *const HandleSlot) -> bool {
    // SAFETY: the caller guarantees validity when non-null.
    unsafe { slot.as_ref() }.is_none_or(HandleSlot::is_empty)
}

/// Number of slots sharing the object behind `slot`.
///
/// # Safety
/// `slot` must be null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_handle_holders(slot: *const HandleSlot) -> usize {
    // SAFETY: the caller guarantees validity when non-null.
    unsafe { slot.as_ref() }.map_or(0, |slot| HandleTable::global().holders(slot))
}

/// Decode a boundary payload and re-encode it with non-finite numbers nulled.
///
/// # Safety
/// `data` must be valid for `len` bytes; `len_out` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_value_normalize(
    data: *const u8,
    len: usize,
    len_out: *mut usize,
    error_out: ErrorOut,
) -> *mut u8 {
    unsafe {
        guarded(error_out, ptr::null_mut(), || {
            let value = codec::decode(span(data, len)?)?;
            owned_bytes(codec::encode(&value), len_out)
        })
    }
}

/// # Safety
/// `reply` must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_search_reply_finished(reply: *const HandleSlot, error_out: ErrorOut) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_finished(&HandleTable::global(), slot_ref(reply)?)?;
            Ok(true)
        })
    }
}

/// # Safety
/// `reply` must be valid, `message` valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_search_reply_error(
    reply: *const HandleSlot,
    message: *const u8,
    len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_error(&HandleTable::global(), slot_ref(reply)?, span(message, len)?)?;
            Ok(true)
        })
    }
}

/// Register a category; its handle is written into the empty `category_out`.
///
/// # Safety
/// Slot pointers must be valid; each span valid for its length.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn sb_search_reply_register_category(
    reply: *const HandleSlot,
    id: *const u8,
    id_len: usize,
    title: *const u8,
    title_len: usize,
    icon: *const u8,
    icon_len: usize,
    template: *const u8,
    template_len: usize,
    category_out: *mut HandleSlot,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_register_category(
                &HandleTable::global(),
                slot_ref(reply)?,
                span(id, id_len)?,
                span(title, title_len)?,
                span(icon, icon_len)?,
                span(template, template_len)?,
                slot_mut(category_out)?,
            )?;
            Ok(true)
        })
    }
}

/// # Safety
/// Slot pointers must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_search_reply_register_departments(
    reply: *const HandleSlot,
    department: *const HandleSlot,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_register_departments(
                &HandleTable::global(),
                slot_ref(reply)?,
                slot_ref(department)?,
            )?;
            Ok(true)
        })
    }
}

/// # Safety
/// Slot pointers must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_search_reply_push(
    reply: *const HandleSlot,
    result: *const HandleSlot,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_push(&HandleTable::global(), slot_ref(reply)?, slot_ref(result)?)?;
            Ok(true)
        })
    }
}

/// Push filters (JSON array) with their state (JSON object).
///
/// # Safety
/// `reply` must be valid; each span valid for its length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_search_reply_push_filters(
    reply: *const HandleSlot,
    filters: *const u8,
    filters_len: usize,
    state: *const u8,
    state_len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::search_reply_push_filters(
                &HandleTable::global(),
                slot_ref(reply)?,
                span(filters, filters_len)?,
                span(state, state_len)?,
            )?;
            Ok(true)
        })
    }
}

/// # Safety
/// `reply` must be valid; `error_out` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_preview_reply_finished(reply: *const HandleSlot, error_out: ErrorOut) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::preview_reply_finished(&HandleTable::global(), slot_ref(reply)?)?;
            Ok(true)
        })
    }
}

/// # Safety
/// `reply` must be valid, `message` valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_preview_reply_error(
    reply: *const HandleSlot,
    message: *const u8,
    len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::preview_reply_error(&HandleTable::global(), slot_ref(reply)?, span(message, len)?)?;
            Ok(true)
        })
    }
}

/// Register column layouts given as a JSON array.
///
/// # Safety
/// `reply` must be valid, `layouts` valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_preview_reply_register_layout(
    reply: *const HandleSlot,
    layouts: *const u8,
    len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::preview_reply_register_layout(&HandleTable::global(), slot_ref(reply)?, span(layouts, len)?)?;
            Ok(true)
        })
    }
}

/// Push one widget given as a JSON object.
///
/// # Safety
/// `reply` must be valid, `widget` valid for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_preview_reply_push_widget(
    reply: *const HandleSlot,
    widget: *const u8,
    len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::preview_reply_push_widgets(&HandleTable::global(), slot_ref(reply)?, &[span(widget, len)?])?;
            Ok(true)
        })
    }
}

/// # Safety
/// `reply` must be valid; each span valid for its length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_preview_reply_push_attr(
    reply: *const HandleSlot,
    key: *const u8,
    key_len: usize,
    value: *const u8,
    value_len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::preview_reply_push_attr(
                &HandleTable::global(),
                slot_ref(reply)?,
                span(key, key_len)?,
                span(value, value_len)?,
            )?;
            Ok(true)
        })
    }
}

/// Read a result attribute as JSON. Release with [`sb_bytes_free`].
///
/// # Safety
/// `result` must be valid, `key` valid for `key_len` bytes, `len_out` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_result_get_attr(
    result: *const HandleSlot,
    key: *const u8,
    key_len: usize,
    len_out: *mut usize,
    error_out: ErrorOut,
) -> *mut u8 {
    unsafe {
        guarded(error_out, ptr::null_mut(), || {
            let bytes = marshal::result_get_attr(&HandleTable::global(), slot_ref(result)?, span(key, key_len)?)?;
            owned_bytes(bytes, len_out)
        })
    }
}

/// # Safety
/// `result` must be valid; each span valid for its length.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_result_set_attr(
    result: *const HandleSlot,
    key: *const u8,
    key_len: usize,
    value: *const u8,
    value_len: usize,
    error_out: ErrorOut,
) -> bool {
    unsafe {
        guarded(error_out, false, || {
            marshal::result_set_attr(
                &HandleTable::global(),
                slot_ref(result)?,
                span(key, key_len)?,
                span(value, value_len)?,
            )?;
            Ok(true)
        })
    }
}

/// New handles to a department's children.
///
/// Returns an array of `*count_out` slots, released with [`sb_slots_free`].
///
/// # Safety
/// `department` must be valid, `count_out` writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_department_subdepartments(
    department: *const HandleSlot,
    count_out: *mut usize,
    error_out: ErrorOut,
) -> *mut HandleSlot {
    unsafe {
        guarded(error_out, ptr::null_mut(), || {
            if count_out.is_null() {
                return Err(BridgeError::scope("null count out-parameter"));
            }
            let table = HandleTable::global();
            let slots = marshal::department_subdepartments(&table, slot_ref(department)?)?;
            let boxed = slots.into_boxed_slice();
            *count_out = boxed.len();
            Ok(Box::into_raw(boxed).cast::<HandleSlot>())
        })
    }
}

/// Destroy every slot in an array from [`sb_department_subdepartments`] and free it.
///
/// # Safety
/// `slots` and `count` must come from that call, released once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_slots_free(slots: *mut HandleSlot, count: usize) {
    if slots.is_null() {
        return;
    }
    // SAFETY: the pointer and count describe a boxed slice handed out above.
    let mut boxed = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(slots, count)) };
    let table = HandleTable::global();
    for slot in boxed.iter_mut() {
        if let Err(e) = table.destroy(slot) {
            tracing::warn!(target: "bridge", "releasing child slot: {}", e);
        }
    }
}

/// Release a string handed out through `error_out`.
///
/// # Safety
/// `s` must be null or come from this library, released once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_string_free(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: produced by `CString::into_raw`.
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Release a buffer returned with its length.
///
/// # Safety
/// `data` and `len` must come from this library, released once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sb_bytes_free(data: *mut u8, len: usize) {
    if !data.is_null() {
        // SAFETY: produced from a boxed slice of exactly `len` bytes.
        drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(data, len)) });
    }
}
