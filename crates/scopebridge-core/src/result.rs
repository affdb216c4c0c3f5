//! Categories and search results.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{BridgeError, DecodeError, RequestError};
use crate::handle::{HandleKind, Shared, Tracked};
use crate::value::Value;

/// Renderer used when a category registers an empty template.
pub const DEFAULT_RENDERER: &str = r#"{"schema-version":1,"template":{"category-layout":"grid"},"components":{"title":"title","art":"art"}}"#;

/// A group of results sharing a renderer template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    id: String,
    title: String,
    icon: String,
    renderer_template: Value,
}

impl Category {
    /// Create a category; `template` is JSON text, empty for the default.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        icon: impl Into<String>,
        template: &str,
    ) -> Result<Self, DecodeError> {
        let template = if template.trim().is_empty() {
            DEFAULT_RENDERER
        } else {
            template
        };
        let renderer_template = codec::decode(template.as_bytes())?;
        if renderer_template.as_object().is_none() {
            return Err(DecodeError::shape("renderer template object", renderer_template.type_name()));
        }
        Ok(Self {
            id: id.into(),
            title: title.into(),
            icon: icon.into(),
            renderer_template,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    pub fn renderer_template(&self) -> &Value {
        &self.renderer_template
    }
}

impl Tracked for Category {
    const KIND: HandleKind = HandleKind::Category;
}

/// A result shared between the host and handle slots.
pub type ResultRef = Arc<Shared<ScopeResult>>;

/// One search result: a bag of attributes plus routing flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeResult {
    attributes: BTreeMap<String, Value>,
    intercept_activation: bool,
    category: Option<Arc<Category>>,
}

impl ScopeResult {
    /// Create an uncategorised result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a result belonging to `category`.
    pub fn categorised(category: Arc<Category>) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Rebuild a result from its structured form.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let attrs = value
            .get("attrs")
            .and_then(Value::as_object)
            .ok_or_else(|| DecodeError::shape("result with an attrs object", value.type_name()))?;
        let intercept_activation = value
            .get("intercept_activation")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(Self {
            attributes: attrs.clone(),
            intercept_activation,
            category: None,
        })
    }

    /// Wrap into a shared reference.
    pub fn into_shared(self) -> ResultRef {
        Arc::new(Shared::new(self))
    }

    /// Read an attribute that must exist.
    pub fn get(&self, key: &str) -> Result<&Value, RequestError> {
        self.attributes
            .get(key)
            .ok_or_else(|| RequestError::MissingAttribute { key: key.to_string() })
    }

    /// Read and decode an attribute.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, BridgeError> {
        Ok(codec::from_value(self.get(key)?)?)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Set an attribute; non-finite floats are stored as null.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into().sanitized());
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    fn string_attr(&self, key: &str) -> &str {
        self.attributes.get(key).and_then(Value::as_str).unwrap_or("")
    }

    pub fn uri(&self) -> &str {
        self.string_attr("uri")
    }

    pub fn title(&self) -> &str {
        self.string_attr("title")
    }

    pub fn art(&self) -> &str {
        self.string_attr("art")
    }

    pub fn dnd_uri(&self) -> &str {
        self.string_attr("dnd_uri")
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.set("uri", uri.into());
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.set("title", title.into());
    }

    pub fn set_art(&mut self, art: impl Into<String>) {
        self.set("art", art.into());
    }

    pub fn set_dnd_uri(&mut self, dnd_uri: impl Into<String>) {
        self.set("dnd_uri", dnd_uri.into());
    }

    /// Route activation of this result back to the scope.
    pub fn set_intercept_activation(&mut self) {
        self.intercept_activation = true;
    }

    pub fn intercept_activation(&self) -> bool {
        self.intercept_activation
    }

    pub fn category(&self) -> Option<&Arc<Category>> {
        self.category.as_ref()
    }

    /// Check the result may be pushed to a search reply.
    pub fn validate_for_push(&self) -> Result<(), RequestError> {
        if self.category.is_none() {
            return Err(RequestError::invalid("result has no category"));
        }
        if self.uri().is_empty() {
            return Err(RequestError::invalid("result has no uri"));
        }
        Ok(())
    }

    /// Structured form used on the boundary.
    pub fn to_value(&self) -> Value {
        let mut obj = BTreeMap::new();
        obj.insert("attrs".to_string(), Value::Object(self.attributes.clone()));
        obj.insert(
            "intercept_activation".to_string(),
            Value::Bool(self.intercept_activation),
        );
        if let Some(category) = &self.category {
            obj.insert("category".to_string(), Value::from(category.id()));
        }
        Value::Object(obj)
    }
}

impl Tracked for Shared<ScopeResult> {
    const KIND: HandleKind = HandleKind::Result;
}
