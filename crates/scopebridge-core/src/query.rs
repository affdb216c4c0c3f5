//! Canned queries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::codec;
use crate::error::DecodeError;
use crate::value::Value;

/// Filter selections keyed by filter id.
pub type FilterState = BTreeMap<String, Value>;

const URI_SCHEME: &str = "scope://";

/// A search request addressed to one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CannedQuery {
    scope_id: String,
    #[serde(default)]
    query_string: String,
    #[serde(default)]
    department_id: String,
    #[serde(default)]
    filter_state: FilterState,
}

impl CannedQuery {
    /// Create a query with an empty filter state.
    pub fn new(
        scope_id: impl Into<String>,
        query_string: impl Into<String>,
        department_id: impl Into<String>,
    ) -> Self {
        Self {
            scope_id: scope_id.into(),
            query_string: query_string.into(),
            department_id: department_id.into(),
            filter_state: FilterState::new(),
        }
    }

    /// Create a query carrying filter selections.
    pub fn with_filter_state(mut self, filter_state: FilterState) -> Self {
        self.filter_state = filter_state;
        self
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn department_id(&self) -> &str {
        &self.department_id
    }

    pub fn filter_state(&self) -> &FilterState {
        &self.filter_state
    }

    pub fn filter_state_mut(&mut self) -> &mut FilterState {
        &mut self.filter_state
    }

    pub fn set_query_string(&mut self, query_string: impl Into<String>) {
        self.query_string = query_string.into();
    }

    pub fn set_department_id(&mut self, department_id: impl Into<String>) {
        self.department_id = department_id.into();
    }

    pub fn set_filter_state(&mut self, filter_state: FilterState) {
        self.filter_state = filter_state;
    }

    /// Structured form used on the boundary.
    pub fn to_value(&self) -> Value {
        let mut obj = BTreeMap::new();
        obj.insert("scope_id".to_string(), Value::from(self.scope_id.as_str()));
        obj.insert("query_string".to_string(), Value::from(self.query_string.as_str()));
        obj.insert("department_id".to_string(), Value::from(self.department_id.as_str()));
        obj.insert(
            "filter_state".to_string(),
            Value::Object(self.filter_state.clone()).sanitized(),
        );
        Value::Object(obj)
    }

    /// Rebuild a query from its structured form.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        if value.as_object().is_none() {
            return Err(DecodeError::shape("query object", value.type_name()));
        }
        codec::from_value(value)
    }

    /// Render as `scope://<id>?q=<query>&dep=<department>&filters=<json>`.
    pub fn to_uri(&self) -> String {
        let mut params = form_urlencoded::Serializer::new(String::new());
        params.append_pair("q", &self.query_string);
        if !self.department_id.is_empty() {
            params.append_pair("dep", &self.department_id);
        }
        if !self.filter_state.is_empty() {
            params.append_pair(
                "filters",
                &codec::encode_string(&Value::Object(self.filter_state.clone())),
            );
        }
        let scope: String = form_urlencoded::byte_serialize(self.scope_id.as_bytes()).collect();
        format!("{URI_SCHEME}{scope}?{}", params.finish())
    }

    /// Parse a URI produced by [`CannedQuery::to_uri`].
    pub fn from_uri(uri: &str) -> Result<Self, DecodeError> {
        let malformed = |message: &str| DecodeError::Uri {
            uri: uri.to_string(),
            message: message.to_string(),
        };
        let rest = uri
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| malformed("missing scope:// prefix"))?;
        let (scope, params) = rest.split_once('?').unwrap_or((rest, ""));
        // byte_serialize escaped '&' and '=', so the id decodes as a lone key.
        let scope_id = form_urlencoded::parse(scope.as_bytes())
            .next()
            .map(|(key, _)| key.into_owned())
            .unwrap_or_default();
        if scope_id.is_empty() {
            return Err(malformed("empty scope id"));
        }

        let mut query = Self::new(scope_id, "", "");
        for (key, value) in form_urlencoded::parse(params.as_bytes()) {
            match key.as_ref() {
                "q" => query.query_string = value.into_owned(),
                "dep" => query.department_id = value.into_owned(),
                "filters" => match codec::decode(value.as_bytes())? {
                    Value::Object(state) => query.filter_state = state,
                    other => return Err(DecodeError::shape("filter state object", other.type_name())),
                },
                _ => {}
            }
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_roundtrip() {
        let query = CannedQuery::new("weather", "london", "");
        let decoded = CannedQuery::from_value(&query.to_value()).unwrap();
        assert_eq!(decoded, query);
        assert!(decoded.filter_state().is_empty());
    }

    #[test]
    fn test_uri_roundtrip_with_filters() {
        let mut state = FilterState::new();
        state.insert("genre".to_string(), Value::from(vec!["rock", "jazz & blues"]));
        let query = CannedQuery::new("music.scope_id", "a b&c=d", "albums").with_filter_state(state);

        let uri = query.to_uri();
        assert!(uri.starts_with("scope://music.scope_id?q=a+b%26c%3Dd"));
        assert_eq!(CannedQuery::from_uri(&uri).unwrap(), query);
    }

    #[test]
    fn test_uri_without_query_part() {
        let query = CannedQuery::from_uri("scope://clock").unwrap();
        assert_eq!(query.scope_id(), "clock");
        assert_eq!(query.query_string(), "");
    }

    #[test]
    fn test_uri_rejects_wrong_scheme() {
        assert!(matches!(
            CannedQuery::from_uri("http://clock?q=1"),
            Err(DecodeError::Uri { .. })
        ));
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(CannedQuery::from_value(&Value::from("weather")).is_err());
    }
}
