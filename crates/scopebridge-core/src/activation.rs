//! Activation responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::codec;
use crate::error::{DecodeError, RequestError};
use crate::query::CannedQuery;
use crate::value::Value;

/// What the host should do after an activation or widget action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivationStatus {
    /// Let the host apply its default behaviour.
    #[default]
    NotHandled,
    ShowDash,
    HideDash,
    ShowPreview,
    /// Run the query carried by the response.
    PerformQuery,
}

/// Outcome of activating a result or a preview widget action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivationResponse {
    status: ActivationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    query: Option<CannedQuery>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    scope_data: Value,
}

impl ActivationResponse {
    /// Create a response with a status; perform-query needs [`Self::for_query`].
    pub fn new(status: ActivationStatus) -> Result<Self, RequestError> {
        if status == ActivationStatus::PerformQuery {
            return Err(RequestError::QueryResponseWithoutQuery);
        }
        Ok(Self {
            status,
            query: None,
            scope_data: Value::Null,
        })
    }

    pub fn not_handled() -> Self {
        Self::default()
    }

    /// A response that makes the host run `query`.
    pub fn for_query(query: CannedQuery) -> Self {
        Self {
            status: ActivationStatus::PerformQuery,
            query: Some(query),
            scope_data: Value::Null,
        }
    }

    pub fn status(&self) -> ActivationStatus {
        self.status
    }

    pub fn query(&self) -> Option<&CannedQuery> {
        self.query.as_ref()
    }

    pub fn scope_data(&self) -> &Value {
        &self.scope_data
    }

    /// Attach data handed back to the scope on the next request.
    pub fn set_scope_data(&mut self, data: impl Into<Value>) {
        self.scope_data = data.into().sanitized();
    }

    /// Structured form used on the boundary.
    pub fn to_value(&self) -> Value {
        let mut obj = BTreeMap::new();
        obj.insert("status".to_string(), Value::String(self.status.to_string()));
        if let Some(query) = &self.query {
            obj.insert("query".to_string(), query.to_value());
        }
        if !self.scope_data.is_null() {
            obj.insert("scope_data".to_string(), self.scope_data.clone());
        }
        Value::Object(obj)
    }

    /// Rebuild a response from its structured form.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let response: Self = codec::from_value(value)?;
        if response.status == ActivationStatus::PerformQuery && response.query.is_none() {
            return Err(DecodeError::shape("perform_query response with a query", "none"));
        }
        Ok(response)
    }
}
