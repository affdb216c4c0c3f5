//! Boundary codec for structured values.
//!
//! Values cross the bridge as UTF-8 JSON. Encoding never fails: floats
//! without a JSON form (NaN, ±∞) are written as `null`, so
//! `decode(&encode(v))` yields `v` with those positions nulled.

use std::collections::BTreeSet;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DecodeError, EncodeError};
use crate::value::Value;

/// Encode a value to its boundary bytes.
pub fn encode(value: &Value) -> Vec<u8> {
    encode_string(value).into_bytes()
}

/// Encode a value to its boundary text.
pub fn encode_string(value: &Value) -> String {
    serde_json::Value::from(value).to_string()
}

/// Decode boundary bytes into a value.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let json: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(json.into())
}

/// Convert a typed value to a structured value.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, EncodeError> {
    Ok(serde_json::to_value(value)?.into())
}

/// Convert a structured value into a typed value.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, DecodeError> {
    Ok(serde_json::from_value(serde_json::Value::from(value))?)
}

/// Encode a typed value to boundary bytes.
pub fn encode_typed<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(encode(&to_value(value)?))
}

/// Decode boundary bytes into a typed value.
pub fn decode_typed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    from_value(&decode(bytes)?)
}

/// Encode a set as an array in its natural order.
pub fn encode_set<T: Serialize>(set: &BTreeSet<T>) -> Result<Vec<u8>, EncodeError> {
    encode_typed(set)
}

/// Decode an array into a set, dropping duplicate elements.
pub fn decode_set<T: DeserializeOwned + Ord>(bytes: &[u8]) -> Result<BTreeSet<T>, DecodeError> {
    let items: Vec<T> = decode_typed(bytes)?;
    Ok(items.into_iter().collect())
}
