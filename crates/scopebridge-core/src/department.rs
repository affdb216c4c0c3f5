//! Department trees used for navigation within a scope.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::RequestError;
use crate::handle::{HandleKind, Shared, Tracked};
use crate::query::CannedQuery;
use crate::value::Value;

/// A department shared between its parent and any handle slots.
pub type DepartmentRef = Arc<Shared<Department>>;

/// A navigable sub-section of a scope's results.
#[derive(Debug, Clone)]
pub struct Department {
    id: String,
    query: CannedQuery,
    label: String,
    alternate_label: Option<String>,
    subdepartments: Vec<DepartmentRef>,
    has_subdepartments: bool,
}

impl Department {
    /// Create a department; its query is re-targeted at `id`.
    pub fn new(
        id: impl Into<String>,
        query: &CannedQuery,
        label: impl Into<String>,
    ) -> Result<Self, RequestError> {
        let id = id.into();
        let label = label.into();
        if label.is_empty() {
            return Err(RequestError::invalid("department label cannot be empty"));
        }
        let mut query = query.clone();
        query.set_department_id(id.clone());
        Ok(Self {
            id,
            query,
            label,
            alternate_label: None,
            subdepartments: Vec::new(),
            has_subdepartments: false,
        })
    }

    /// Create the root department (empty id).
    pub fn root(query: &CannedQuery, label: impl Into<String>) -> Result<Self, RequestError> {
        Self::new("", query, label)
    }

    /// Wrap into a shared reference.
    pub fn into_shared(self) -> DepartmentRef {
        Arc::new(Shared::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn query(&self) -> &CannedQuery {
        &self.query
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn alternate_label(&self) -> Option<&str> {
        self.alternate_label.as_deref()
    }

    pub fn set_alternate_label(&mut self, label: impl Into<String>) {
        self.alternate_label = Some(label.into());
    }

    pub fn subdepartments(&self) -> &[DepartmentRef] {
        &self.subdepartments
    }

    /// Mark that children exist even if they are not attached yet.
    pub fn set_has_subdepartments(&mut self, has: bool) {
        self.has_subdepartments = has;
    }

    pub fn has_subdepartments(&self) -> bool {
        self.has_subdepartments || !self.subdepartments.is_empty()
    }

    fn tree_value(&self, path: &mut HashSet<*const Shared<Department>>) -> Result<Value, RequestError> {
        let mut children = Vec::with_capacity(self.subdepartments.len());
        for child in &self.subdepartments {
            let key = Arc::as_ptr(child);
            if !path.insert(key) {
                return Err(RequestError::invalid(format!(
                    "department '{}' contains itself",
                    self.id
                )));
            }
            children.push(child.read().tree_value(path)?);
            path.remove(&key);
        }

        let mut obj = BTreeMap::new();
        obj.insert("id".to_string(), Value::from(self.id.as_str()));
        obj.insert("label".to_string(), Value::from(self.label.as_str()));
        obj.insert("query".to_string(), Value::from(self.query.to_uri()));
        if let Some(alt) = &self.alternate_label {
            obj.insert("alternate_label".to_string(), Value::from(alt.as_str()));
        }
        obj.insert("has_subdepartments".to_string(), Value::Bool(self.has_subdepartments()));
        obj.insert("departments".to_string(), Value::Array(children));
        Ok(Value::Object(obj))
    }
}

impl Shared<Department> {
    /// Attach `child`; fails if this department is reachable from it.
    pub fn add_subdepartment(self: &Arc<Self>, child: DepartmentRef) -> Result<(), RequestError> {
        self.ensure_not_within(&child)?;
        self.write().subdepartments.push(child);
        Ok(())
    }

    /// Replace the children; fails if this department is reachable from any of them.
    pub fn set_subdepartments(self: &Arc<Self>, children: Vec<DepartmentRef>) -> Result<(), RequestError> {
        for child in &children {
            self.ensure_not_within(child)?;
        }
        self.write().subdepartments = children;
        Ok(())
    }

    fn ensure_not_within(self: &Arc<Self>, child: &DepartmentRef) -> Result<(), RequestError> {
        let target = Arc::as_ptr(self);
        let mut seen = HashSet::new();
        let mut pending = vec![child.clone()];
        while let Some(node) = pending.pop() {
            if Arc::as_ptr(&node) == target {
                return Err(RequestError::invalid(format!(
                    "department '{}' cannot contain itself",
                    self.read().id
                )));
            }
            if seen.insert(Arc::as_ptr(&node)) {
                pending.extend(node.read().subdepartments.iter().cloned());
            }
        }
        Ok(())
    }

    /// Structured form of this department and its descendants.
    ///
    /// Fails when a department is reachable from itself.
    pub fn to_value(self: &Arc<Self>) -> Result<Value, RequestError> {
        let mut path = HashSet::new();
        path.insert(Arc::as_ptr(self));
        self.read().tree_value(&mut path)
    }
}

impl Tracked for Shared<Department> {
    const KIND: HandleKind = HandleKind::Department;
}
