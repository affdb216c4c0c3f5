//! Handle-backed objects handed to scope logic.
//!
//! Each wraps an [`OwnedHandle`], so scope logic holds a counted reference
//! that is released when the wrapper drops, however long the embedding
//! runtime keeps it alive.

use std::sync::Arc;

use scopebridge_core::{
    BridgeResult, CannedQuery, Category, Department, HandleSlot, HandleTable, LifecycleError,
    OwnedHandle, ResultRef, ScopeMetadata, ScopeResult, Shared, Value, codec,
};
use serde::de::DeserializeOwned;

use crate::marshal;

/// A result record.
#[derive(Debug)]
pub struct ResultHandle {
    handle: OwnedHandle<Shared<ScopeResult>>,
}

impl ResultHandle {
    /// Reference a result the host handed over.
    pub fn from_result(table: &Arc<HandleTable>, result: ResultRef) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: OwnedHandle::new(table, result)?,
        })
    }

    /// Create an empty result in a registered category.
    pub fn new_categorised(category: &CategoryHandle) -> BridgeResult<Self> {
        let table = category.handle.table();
        let mut slot = HandleSlot::empty();
        marshal::new_categorised_result(table, category.handle.slot(), &mut slot)?;
        Ok(Self {
            handle: OwnedHandle::adopt(table, slot)?,
        })
    }

    pub fn try_clone(&self) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: self.handle.try_clone()?,
        })
    }

    pub fn slot(&self) -> &HandleSlot {
        self.handle.slot()
    }

    /// Read an attribute; a missing key is a request error.
    pub fn get(&self, key: &str) -> BridgeResult<Value> {
        let bytes = marshal::result_get_attr(self.handle.table(), self.handle.slot(), key.as_bytes())?;
        Ok(codec::decode(&bytes)?)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> BridgeResult<T> {
        Ok(codec::from_value(&self.get(key)?)?)
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let bytes = codec::encode(&value.into());
        marshal::result_set_attr(self.handle.table(), self.handle.slot(), key.as_bytes(), &bytes)
    }

    pub fn set_intercept_activation(&self) -> BridgeResult<()> {
        marshal::result_set_intercept_activation(self.handle.table(), self.handle.slot())
    }

    pub fn uri(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().uri().to_string())
    }

    pub fn title(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().title().to_string())
    }

    pub fn art(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().art().to_string())
    }

    pub fn dnd_uri(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().dnd_uri().to_string())
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> BridgeResult<ScopeResult> {
        Ok(self.handle.get()?.snapshot())
    }
}

/// A category registered on a search reply.
#[derive(Debug)]
pub struct CategoryHandle {
    handle: OwnedHandle<Category>,
}

impl CategoryHandle {
    pub(crate) fn adopt(table: &Arc<HandleTable>, slot: HandleSlot) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: OwnedHandle::adopt(table, slot)?,
        })
    }

    pub fn try_clone(&self) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: self.handle.try_clone()?,
        })
    }

    pub fn slot(&self) -> &HandleSlot {
        self.handle.slot()
    }

    pub fn category(&self) -> Result<Arc<Category>, LifecycleError> {
        self.handle.get()
    }
}

/// A department, possibly shared with a parent.
#[derive(Debug)]
pub struct DepartmentHandle {
    handle: OwnedHandle<Shared<Department>>,
}

impl DepartmentHandle {
    pub fn new(
        table: &Arc<HandleTable>,
        id: &str,
        query: &CannedQuery,
        label: &str,
    ) -> BridgeResult<Self> {
        let query_json = codec::encode(&query.to_value());
        let mut slot = HandleSlot::empty();
        marshal::new_department(table, id.as_bytes(), &query_json, label.as_bytes(), &mut slot)?;
        Ok(Self {
            handle: OwnedHandle::adopt(table, slot)?,
        })
    }

    /// Create the root department for `query`.
    pub fn root(table: &Arc<HandleTable>, query: &CannedQuery, label: &str) -> BridgeResult<Self> {
        Self::new(table, "", query, label)
    }

    pub fn try_clone(&self) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: self.handle.try_clone()?,
        })
    }

    pub fn slot(&self) -> &HandleSlot {
        self.handle.slot()
    }

    pub fn add_subdepartment(&self, child: &DepartmentHandle) -> BridgeResult<()> {
        marshal::department_add_subdepartment(self.handle.table(), self.handle.slot(), child.slot())
    }

    pub fn set_subdepartments(&self, children: &[DepartmentHandle]) -> BridgeResult<()> {
        marshal::department_set_subdepartments(
            self.handle.table(),
            self.handle.slot(),
            children.iter().map(DepartmentHandle::slot),
        )
    }

    pub fn subdepartments(&self) -> BridgeResult<Vec<DepartmentHandle>> {
        let table = self.handle.table();
        let slots = marshal::department_subdepartments(table, self.handle.slot())?;
        let mut children = Vec::with_capacity(slots.len());
        // Adopt every slot even after a failure so none leaks.
        let mut failure = None;
        for slot in slots {
            match OwnedHandle::adopt(table, slot) {
                Ok(handle) => children.push(DepartmentHandle { handle }),
                Err(e) => failure = Some(e),
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(children),
        }
    }

    pub fn id(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().id().to_string())
    }

    pub fn label(&self) -> BridgeResult<String> {
        Ok(self.handle.get()?.read().label().to_string())
    }

    pub fn alternate_label(&self) -> BridgeResult<Option<String>> {
        Ok(self.handle.get()?.read().alternate_label().map(str::to_string))
    }

    pub fn set_alternate_label(&self, label: &str) -> BridgeResult<()> {
        self.handle.get()?.write().set_alternate_label(label);
        Ok(())
    }

    pub fn has_subdepartments(&self) -> BridgeResult<bool> {
        Ok(self.handle.get()?.read().has_subdepartments())
    }

    pub fn set_has_subdepartments(&self, has: bool) -> BridgeResult<()> {
        self.handle.get()?.write().set_has_subdepartments(has);
        Ok(())
    }
}

/// A registry entry listed through the scope base.
#[derive(Debug)]
pub struct ScopeMetadataHandle {
    handle: OwnedHandle<ScopeMetadata>,
}

impl ScopeMetadataHandle {
    pub fn new(table: &Arc<HandleTable>, metadata: ScopeMetadata) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: OwnedHandle::new(table, Arc::new(metadata))?,
        })
    }

    pub fn slot(&self) -> &HandleSlot {
        self.handle.slot()
    }

    pub fn metadata(&self) -> Result<Arc<ScopeMetadata>, LifecycleError> {
        self.handle.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_department_children_roundtrip() {
        let table = Arc::new(HandleTable::new());
        let query = CannedQuery::new("music", "", "");
        let root = DepartmentHandle::root(&table, &query, "All").unwrap();
        let rock = DepartmentHandle::new(&table, "rock", &query, "Rock").unwrap();
        let jazz = DepartmentHandle::new(&table, "jazz", &query, "Jazz").unwrap();

        root.set_subdepartments(&[rock, jazz]).unwrap();
        let children = root.subdepartments().unwrap();
        let ids: Vec<String> = children.iter().map(|c| c.id().unwrap()).collect();
        assert_eq!(ids, vec!["rock".to_string(), "jazz".to_string()]);
        assert!(root.has_subdepartments().unwrap());

        drop(children);
        drop(root);
        assert!(table.is_empty());
    }

    #[test]
    fn test_result_attributes() {
        let table = Arc::new(HandleTable::new());
        let result = ResultHandle::from_result(&table, ScopeResult::new().into_shared()).unwrap();
        result.set("count", 3).unwrap();
        result.set("ratio", f64::NAN).unwrap();

        assert_eq!(result.get_as::<i64>("count").unwrap(), 3);
        assert!(result.get("ratio").unwrap().is_null());
        assert!(result.get("missing").unwrap_err().is_request_error());
        assert_eq!(result.uri().unwrap(), "");
    }
}
