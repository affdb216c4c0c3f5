//! Request metadata and scope registry metadata.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use derive_builder::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::codec;
use crate::error::{DecodeError, RequestError};
use crate::handle::{HandleKind, Tracked};
use crate::value::Value;

/// Network connectivity as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectivityStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

/// Fields common to search and action metadata.
///
/// The host may omit locale and form factor; they are then `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    form_factor: Option<String>,
    #[serde(default)]
    internet_connectivity: ConnectivityStatus,
}

impl QueryMetadata {
    pub fn new(locale: Option<String>, form_factor: Option<String>) -> Self {
        Self {
            locale,
            form_factor,
            internet_connectivity: ConnectivityStatus::Unknown,
        }
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn form_factor(&self) -> Option<&str> {
        self.form_factor.as_deref()
    }

    pub fn internet_connectivity(&self) -> ConnectivityStatus {
        self.internet_connectivity
    }

    pub fn set_internet_connectivity(&mut self, status: ConnectivityStatus) {
        self.internet_connectivity = status;
    }
}

/// Geographic position of the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub area_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub city: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zip_postal_code: String,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..Default::default()
        }
    }
}

/// Metadata accompanying a search request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    #[serde(flatten)]
    common: QueryMetadata,
    #[serde(default)]
    cardinality: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<Location>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    aggregated_keywords: BTreeSet<String>,
}

impl SearchMetadata {
    /// A cardinality of zero means the host sets no limit.
    pub fn new(cardinality: usize, locale: Option<String>, form_factor: Option<String>) -> Self {
        Self {
            common: QueryMetadata::new(locale, form_factor),
            cardinality,
            location: None,
            aggregated_keywords: BTreeSet::new(),
        }
    }

    pub fn common(&self) -> &QueryMetadata {
        &self.common
    }

    pub fn common_mut(&mut self) -> &mut QueryMetadata {
        &mut self.common
    }

    pub fn locale(&self) -> Option<&str> {
        self.common.locale()
    }

    pub fn form_factor(&self) -> Option<&str> {
        self.common.form_factor()
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn set_cardinality(&mut self, cardinality: usize) {
        self.cardinality = cardinality;
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Attach the device location; coordinates must be finite.
    pub fn set_location(&mut self, location: Location) -> Result<(), RequestError> {
        if !location.latitude.is_finite() || !location.longitude.is_finite() {
            return Err(RequestError::invalid("location coordinates must be finite"));
        }
        self.location = Some(location);
        Ok(())
    }

    pub fn aggregated_keywords(&self) -> &BTreeSet<String> {
        &self.aggregated_keywords
    }

    pub fn set_aggregated_keywords<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregated_keywords = keywords.into_iter().map(Into::into).collect();
    }

    /// Whether the request comes from an aggregating scope.
    pub fn is_aggregated(&self) -> bool {
        !self.aggregated_keywords.is_empty()
    }
}

/// Metadata accompanying a preview, activation or widget action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(flatten)]
    common: QueryMetadata,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    scope_data: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    hints: BTreeMap<String, Value>,
}

impl ActionMetadata {
    pub fn new(locale: Option<String>, form_factor: Option<String>) -> Self {
        Self {
            common: QueryMetadata::new(locale, form_factor),
            scope_data: Value::Null,
            hints: BTreeMap::new(),
        }
    }

    pub fn common(&self) -> &QueryMetadata {
        &self.common
    }

    pub fn locale(&self) -> Option<&str> {
        self.common.locale()
    }

    pub fn form_factor(&self) -> Option<&str> {
        self.common.form_factor()
    }

    /// Data attached by a preview widget action, null when absent.
    pub fn scope_data(&self) -> &Value {
        &self.scope_data
    }

    /// Decode the scope data into a typed value.
    pub fn scope_data_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        codec::from_value(&self.scope_data)
    }

    pub fn set_scope_data(&mut self, data: impl Into<Value>) {
        self.scope_data = data.into().sanitized();
    }

    pub fn hint(&self, key: &str) -> Option<&Value> {
        self.hints.get(key)
    }

    pub fn hints(&self) -> &BTreeMap<String, Value> {
        &self.hints
    }

    pub fn set_hint(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.hints.insert(key.into(), value.into().sanitized());
    }
}

/// A scope listed in the host registry.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScopeMetadata {
    /// Unique scope id.
    pub scope_id: String,

    #[builder(default)]
    #[serde(default)]
    pub display_name: String,

    #[builder(default)]
    #[serde(default)]
    pub description: String,

    #[builder(default)]
    #[serde(default)]
    pub author: String,

    #[builder(default)]
    #[serde(default)]
    pub art: String,

    #[builder(default)]
    #[serde(default)]
    pub icon: String,

    #[builder(default)]
    #[serde(default)]
    pub search_hint: String,

    /// Directory the scope was installed into.
    #[builder(default)]
    #[serde(default)]
    pub scope_directory: PathBuf,

    #[builder(default)]
    #[serde(default)]
    pub invisible: bool,

    #[builder(default)]
    #[serde(default)]
    pub location_data_needed: bool,

    #[builder(default)]
    #[serde(default)]
    pub version: u32,

    #[builder(default)]
    #[serde(default)]
    pub keywords: BTreeSet<String>,

    #[builder(default)]
    #[serde(default)]
    pub appearance_attributes: BTreeMap<String, Value>,

    /// Declarations of the settings the scope accepts.
    #[builder(default)]
    #[serde(default)]
    pub settings_definitions: Vec<Value>,
}

impl ScopeMetadataBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.scope_id {
            Some(id) if !id.is_empty() => Ok(()),
            Some(_) => Err("Scope id cannot be empty".to_string()),
            None => Err("Scope id is required".to_string()),
        }
    }
}

impl ScopeMetadata {
    /// Create a new scope metadata builder.
    pub fn builder() -> ScopeMetadataBuilder {
        ScopeMetadataBuilder::default()
    }

    /// Structured form used on the boundary.
    pub fn to_value(&self) -> Value {
        codec::to_value(self).unwrap_or_default()
    }
}

impl Tracked for ScopeMetadata {
    const KIND: HandleKind = HandleKind::ScopeMetadata;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_locale_is_none() {
        let metadata = SearchMetadata::new(20, None, Some("phone".into()));
        assert_eq!(metadata.locale(), None);
        assert_eq!(metadata.form_factor(), Some("phone"));
        assert_eq!(metadata.common().internet_connectivity(), ConnectivityStatus::Unknown);
    }

    #[test]
    fn test_location_must_be_finite() {
        let mut metadata = SearchMetadata::default();
        assert!(metadata.set_location(Location::new(f64::NAN, 0.0)).is_err());
        metadata.set_location(Location::new(51.5, -0.12)).unwrap();
        assert_eq!(metadata.location().map(|l| l.latitude), Some(51.5));
    }

    #[test]
    fn test_search_metadata_decodes_without_optional_fields() {
        let metadata: SearchMetadata = codec::decode_typed(br#"{"cardinality":5}"#).unwrap();
        assert_eq!(metadata.cardinality(), 5);
        assert!(metadata.location().is_none());
        assert!(!metadata.is_aggregated());
    }

    #[test]
    fn test_action_metadata_scope_data() {
        let mut metadata = ActionMetadata::new(Some("en_GB".into()), None);
        metadata.set_scope_data(Value::Float(f64::INFINITY));
        assert!(metadata.scope_data().is_null());
        metadata.set_scope_data(vec![1, 2]);
        let data: Vec<i64> = metadata.scope_data_as().unwrap();
        assert_eq!(data, vec![1, 2]);
    }

    #[test]
    fn test_scope_metadata_builder_requires_id() {
        assert!(ScopeMetadata::builder().build().is_err());
        let metadata = ScopeMetadata::builder()
            .scope_id("clock")
            .display_name("Clock")
            .build()
            .unwrap();
        assert_eq!(metadata.to_value().get("scope_id"), Some(&Value::from("clock")));
    }
}
