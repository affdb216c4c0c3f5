//! Reply handles given to scope logic.
//!
//! Every call goes through the byte-level entry points in [`crate::marshal`],
//! so a scope written against these wrappers exercises the same path as one
//! driving the bridge from another runtime.

use std::sync::Arc;

use scopebridge_core::{
    BridgeResult, ColumnLayout, Filter, FilterState, HandleSlot, HandleTable,
    LifecycleError, OwnedHandle, PreviewWidget, Value, codec,
};

use crate::marshal;
use crate::native::{NativePreviewReply, NativeSearchReply, ReplyState};
use crate::objects::{CategoryHandle, DepartmentHandle, ResultHandle};

/// Streams the output of one search.
#[derive(Debug)]
pub struct SearchReply {
    handle: OwnedHandle<NativeSearchReply>,
}

impl SearchReply {
    pub fn new(table: &Arc<HandleTable>, reply: Arc<NativeSearchReply>) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: OwnedHandle::new(table, reply)?,
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

    pub fn table(&self) -> &Arc<HandleTable> {
        self.handle.table()
    }

    pub fn state(&self) -> BridgeResult<ReplyState> {
        Ok(self.handle.get()?.state())
    }

    /// Register a category. An empty `template` selects the default renderer.
    pub fn register_category(
        &self,
        id: &str,
        title: &str,
        icon: &str,
        template: &str,
    ) -> BridgeResult<CategoryHandle> {
        let table = self.handle.table();
        let mut slot = HandleSlot::empty();
        marshal::search_reply_register_category(
            table,
            self.handle.slot(),
            id.as_bytes(),
            title.as_bytes(),
            icon.as_bytes(),
            template.as_bytes(),
            &mut slot,
        )?;
        Ok(CategoryHandle::adopt(table, slot)?)
    }

    pub fn register_departments(&self, root: &DepartmentHandle) -> BridgeResult<()> {
        marshal::search_reply_register_departments(self.handle.table(), self.handle.slot(), root.slot())
    }

    pub fn push(&self, result: &ResultHandle) -> BridgeResult<()> {
        marshal::search_reply_push(self.handle.table(), self.handle.slot(), result.slot())
    }

    pub fn push_filters(&self, filters: &[Filter], state: &FilterState) -> BridgeResult<()> {
        let filters_json = codec::encode_typed(filters)?;
        let state_json = codec::encode_typed(state)?;
        marshal::search_reply_push_filters(self.handle.table(), self.handle.slot(), &filters_json, &state_json)
    }

    pub fn finished(&self) -> BridgeResult<()> {
        marshal::search_reply_finished(self.handle.table(), self.handle.slot())
    }

    pub fn error(&self, message: &str) -> BridgeResult<()> {
        marshal::search_reply_error(self.handle.table(), self.handle.slot(), message.as_bytes())
    }
}

/// Streams the output of one preview.
#[derive(Debug)]
pub struct PreviewReply {
    handle: OwnedHandle<NativePreviewReply>,
}

impl PreviewReply {
    pub fn new(table: &Arc<HandleTable>, reply: Arc<NativePreviewReply>) -> Result<Self, LifecycleError> {
        Ok(Self {
            handle: OwnedHandle::new(table, reply)?,
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

    pub fn state(&self) -> BridgeResult<ReplyState> {
        Ok(self.handle.get()?.state())
    }

    pub fn register_layout(&self, layouts: &[ColumnLayout]) -> BridgeResult<()> {
        let layouts_json = codec::encode_typed(layouts)?;
        marshal::preview_reply_register_layout(self.handle.table(), self.handle.slot(), &layouts_json)
    }

    pub fn push_widgets(&self, widgets: &[PreviewWidget]) -> BridgeResult<()> {
        let encoded: Vec<Vec<u8>> = widgets
            .iter()
            .map(|w| codec::encode(&w.to_value()))
            .collect();
        let spans: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();
        marshal::preview_reply_push_widgets(self.handle.table(), self.handle.slot(), &spans)
    }

    pub fn push_attr(&self, key: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let value_json = codec::encode(&value.into());
        marshal::preview_reply_push_attr(self.handle.table(), self.handle.slot(), key.as_bytes(), &value_json)
    }

    pub fn finished(&self) -> BridgeResult<()> {
        marshal::preview_reply_finished(self.handle.table(), self.handle.slot())
    }

    pub fn error(&self, message: &str) -> BridgeResult<()> {
        marshal::preview_reply_error(self.handle.table(), self.handle.slot(), message.as_bytes())
    }
}
