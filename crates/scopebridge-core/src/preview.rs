//! Preview widgets and column layouts.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, RequestError};
use crate::value::Value;

/// The only widget type that may nest other widgets.
pub const EXPANDABLE_WIDGET: &str = "expandable";

/// A widget definition: an ordered attribute map with `id` and `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewWidget(IndexMap<String, Value>);

impl PreviewWidget {
    pub fn new(id: impl Into<String>, widget_type: impl Into<String>) -> Self {
        let mut attrs = IndexMap::new();
        attrs.insert("id".to_string(), Value::String(id.into()));
        attrs.insert("type".to_string(), Value::String(widget_type.into()));
        Self(attrs)
    }

    /// Rebuild a widget from its structured form.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::shape("widget object", value.type_name()))?;
        let id = obj.get("id").and_then(Value::as_str);
        let widget_type = obj.get("type").and_then(Value::as_str);
        let (Some(id), Some(widget_type)) = (id, widget_type) else {
            return Err(DecodeError::shape("widget with string id and type", "object"));
        };
        let mut widget = Self::new(id, widget_type);
        for (key, attr) in obj {
            if key != "id" && key != "type" {
                widget.0.insert(key.clone(), attr.clone().sanitized());
            }
        }
        Ok(widget)
    }

    pub fn id(&self) -> &str {
        self.0.get("id").and_then(Value::as_str).unwrap_or("")
    }

    pub fn widget_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or("")
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a literal attribute value.
    pub fn add_attribute_value(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into().sanitized());
    }

    /// Map an attribute to a field of the previewed result.
    pub fn add_attribute_mapping(&mut self, key: impl Into<String>, field: impl Into<String>) {
        let components = self
            .0
            .entry("components".to_string())
            .or_insert_with(Value::object);
        if let Value::Object(map) = components {
            map.insert(key.into(), Value::String(field.into()));
        } else {
            let mut map = std::collections::BTreeMap::new();
            map.insert(key.into(), Value::String(field.into()));
            *components = Value::Object(map);
        }
    }

    /// Nest a widget; valid only on expandable widgets.
    pub fn add_widget(&mut self, child: PreviewWidget) -> Result<(), RequestError> {
        if self.widget_type() != EXPANDABLE_WIDGET {
            return Err(RequestError::NotExpandable {
                id: self.id().to_string(),
                widget_type: self.widget_type().to_string(),
            });
        }
        let widgets = self
            .0
            .entry("widgets".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match widgets {
            Value::Array(list) => list.push(child.to_value()),
            other => *other = Value::Array(vec![child.to_value()]),
        }
        Ok(())
    }

    /// Structured form used on the boundary.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Boundary JSON text, keeping attribute order.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Widget placement for a given number of columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLayout {
    num_columns: usize,
    columns: Vec<Vec<String>>,
}

impl ColumnLayout {
    pub fn new(num_columns: usize) -> Self {
        Self {
            num_columns,
            columns: Vec::new(),
        }
    }

    /// Append the next column's widget ids.
    pub fn add_column<I, S>(&mut self, widget_ids: I) -> Result<(), RequestError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.columns.len() >= self.num_columns {
            return Err(RequestError::TooManyColumns {
                capacity: self.num_columns,
            });
        }
        self.columns.push(widget_ids.into_iter().map(Into::into).collect());
        Ok(())
    }

    /// Number of columns this layout is for.
    pub fn number_of_columns(&self) -> usize {
        self.num_columns
    }

    /// Number of columns added so far.
    pub fn size(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Result<&[String], RequestError> {
        self.columns
            .get(index)
            .map(Vec::as_slice)
            .ok_or(RequestError::ColumnOutOfRange {
                index,
                count: self.columns.len(),
            })
    }

    /// Check every declared column was filled.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.num_columns == 0 {
            return Err(RequestError::invalid("column layout needs at least one column"));
        }
        if self.columns.len() != self.num_columns {
            return Err(RequestError::invalid(format!(
                "layout for {} columns has {} columns",
                self.num_columns,
                self.columns.len()
            )));
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.columns
                .iter()
                .map(|ids| Value::Array(ids.iter().map(|id| Value::from(id.as_str())).collect()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huge_layout_reserves_nothing() {
        let mut layout = ColumnLayout::new(usize::MAX);
        layout.add_column(["a"]).unwrap();
        assert_eq!(layout.size(), 1);
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_widget_keeps_attribute_order() {
        let mut widget = PreviewWidget::new("header", "header");
        widget.add_attribute_value("zeta", "z");
        widget.add_attribute_mapping("title", "title");
        assert_eq!(
            widget.to_json(),
            r#"{"id":"header","type":"header","zeta":"z","components":{"title":"title"}}"#
        );
    }

    #[test]
    fn test_only_expandable_nests() {
        let mut text = PreviewWidget::new("t", "text");
        assert!(matches!(
            text.add_widget(PreviewWidget::new("c", "text")),
            Err(RequestError::NotExpandable { .. })
        ));

        let mut group = PreviewWidget::new("g", EXPANDABLE_WIDGET);
        group.add_widget(PreviewWidget::new("c", "text")).unwrap();
        let nested = group.attribute("widgets").and_then(Value::as_array).unwrap();
        assert_eq!(nested.len(), 1);
    }

    #[test]
    fn test_widget_from_value_requires_id() {
        let value = crate::codec::decode(br#"{"type":"text"}"#).unwrap();
        assert!(PreviewWidget::from_value(&value).is_err());
        let value = crate::codec::decode(br#"{"id":"a","type":"text","text":"hi"}"#).unwrap();
        let widget = PreviewWidget::from_value(&value).unwrap();
        assert_eq!(widget.attribute("text"), Some(&Value::from("hi")));
    }

    #[test]
    fn test_column_layout_capacity() {
        let mut layout = ColumnLayout::new(2);
        layout.add_column(["a", "b"]).unwrap();
        assert!(layout.validate().is_err());
        layout.add_column(["c"]).unwrap();
        assert!(layout.validate().is_ok());
        assert_eq!(
            layout.add_column(["d"]).unwrap_err(),
            RequestError::TooManyColumns { capacity: 2 }
        );
        assert_eq!(layout.column(1).unwrap(), &["c".to_string()][..]);
        assert!(layout.column(5).is_err());
    }
}
