//! Native reply objects.
//!
//! These wrap the host's sinks for one request and enforce the reply
//! protocol: after `finished` or `error`, every push fails with a
//! [`RequestError`] instead of reaching the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use scopebridge_core::{
    BridgeResult, Category, ColumnLayout, DepartmentRef, Filter, FilterState, HandleKind,
    PreviewWidget, RequestError, ScopeResult, Tracked, Value,
};
use strum::FromRepr;

use crate::host::{HostCapabilities, PreviewReplySink, SearchReplySink};

/// Where a reply is in its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum ReplyState {
    Open = 0,
    Finished = 1,
    Errored = 2,
}

impl ReplyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }
}

#[derive(Debug)]
struct Terminal(AtomicU8);

impl Terminal {
    fn new() -> Self {
        Self(AtomicU8::new(ReplyState::Open as u8))
    }

    fn state(&self) -> ReplyState {
        ReplyState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(ReplyState::Errored)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), RequestError> {
        match self.state() {
            ReplyState::Open => Ok(()),
            state => Err(RequestError::ReplyClosed {
                state: state.as_str(),
                operation,
            }),
        }
    }

    /// Move from open to `to`. Returns whether this call made the move.
    fn close(&self, to: ReplyState) -> Result<bool, RequestError> {
        match self
            .0
            .compare_exchange(ReplyState::Open as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            // A repeated `finished` is harmless.
            Err(current) if current == to as u8 && to == ReplyState::Finished => Ok(false),
            Err(current) => Err(RequestError::ReplyClosed {
                state: ReplyState::from_repr(current)
                    .unwrap_or(ReplyState::Errored)
                    .as_str(),
                operation: if to == ReplyState::Finished {
                    "finish"
                } else {
                    "report an error"
                },
            }),
        }
    }
}

/// Native side of a search reply.
pub struct NativeSearchReply {
    sink: Arc<dyn SearchReplySink>,
    capabilities: HostCapabilities,
    terminal: Terminal,
}

impl std::fmt::Debug for NativeSearchReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSearchReply")
            .field("state", &self.state())
            .finish()
    }
}

impl NativeSearchReply {
    pub fn new(sink: Arc<dyn SearchReplySink>, capabilities: HostCapabilities) -> Self {
        Self {
            sink,
            capabilities,
            terminal: Terminal::new(),
        }
    }

    pub fn state(&self) -> ReplyState {
        self.terminal.state()
    }

    /// Register a category; later results may reference it.
    pub fn register_category(&self, category: Arc<Category>) -> BridgeResult<Arc<Category>> {
        self.terminal.ensure_open("register a category")?;
        self.sink.register_category(&category)?;
        Ok(category)
    }

    pub fn register_departments(&self, root: &DepartmentRef) -> BridgeResult<()> {
        self.terminal.ensure_open("register departments")?;
        // Reject cyclic trees before the host walks them.
        root.to_value()?;
        self.sink.register_departments(root)?;
        Ok(())
    }

    pub fn push(&self, result: &ScopeResult) -> BridgeResult<()> {
        self.terminal.ensure_open("push")?;
        result.validate_for_push()?;
        self.sink.push(result)?;
        Ok(())
    }

    pub fn push_filters(&self, filters: &[Filter], state: &FilterState) -> BridgeResult<()> {
        self.terminal.ensure_open("push filters")?;
        if let Err(e) = self.capabilities.check_filters() {
            tracing::warn!(target: "bridge", "dropping {} filters: {}", filters.len(), e);
            return Err(e.into());
        }
        for filter in filters {
            filter.validate()?;
        }
        self.sink.push_filters(filters, state)?;
        Ok(())
    }

    /// Signal completion. Repeating it is a no-op.
    pub fn finished(&self) -> Result<(), RequestError> {
        if self.terminal.close(ReplyState::Finished)? {
            self.sink.finished();
        }
        Ok(())
    }

    /// Signal failure; allowed only while open.
    pub fn error(&self, message: &str) -> Result<(), RequestError> {
        self.terminal.close(ReplyState::Errored)?;
        tracing::debug!(target: "bridge", "search reply error: {}", message);
        self.sink.error(message);
        Ok(())
    }
}

impl Tracked for NativeSearchReply {
    const KIND: HandleKind = HandleKind::SearchReply;
}

/// Native side of a preview reply.
pub struct NativePreviewReply {
    sink: Arc<dyn PreviewReplySink>,
    terminal: Terminal,
    layout_registered: AtomicBool,
    widgets_pushed: AtomicBool,
}

impl std::fmt::Debug for NativePreviewReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePreviewReply")
            .field("state", &self.state())
            .field("layout_registered", &self.layout_registered.load(Ordering::Relaxed))
            .field("widgets_pushed", &self.widgets_pushed.load(Ordering::Relaxed))
            .finish()
    }
}

impl NativePreviewReply {
    pub fn new(sink: Arc<dyn PreviewReplySink>) -> Self {
        Self {
            sink,
            terminal: Terminal::new(),
            layout_registered: AtomicBool::new(false),
            widgets_pushed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ReplyState {
        self.terminal.state()
    }

    /// Register column layouts; at most once per reply.
    pub fn register_layout(&self, layouts: &[ColumnLayout]) -> BridgeResult<()> {
        self.terminal.ensure_open("register a layout")?;
        for (i, layout) in layouts.iter().enumerate() {
            layout.validate()?;
            if layouts[..i]
                .iter()
                .any(|l| l.number_of_columns() == layout.number_of_columns())
            {
                return Err(RequestError::invalid(format!(
                    "two layouts for {} columns",
                    layout.number_of_columns()
                ))
                .into());
            }
        }
        if self.widgets_pushed.load(Ordering::Acquire) {
            return Err(RequestError::LayoutAfterWidgets.into());
        }
        if self.layout_registered.swap(true, Ordering::AcqRel) {
            return Err(RequestError::LayoutAlreadyRegistered.into());
        }
        self.sink.register_layout(layouts)?;
        Ok(())
    }

    pub fn push_widgets(&self, widgets: &[PreviewWidget]) -> BridgeResult<()> {
        self.terminal.ensure_open("push widgets")?;
        self.widgets_pushed.store(true, Ordering::Release);
        self.sink.push_widgets(widgets)?;
        Ok(())
    }

    pub fn push_attribute(&self, key: &str, value: Value) -> BridgeResult<()> {
        self.terminal.ensure_open("push an attribute")?;
        self.sink.push_attribute(key, &value.sanitized())?;
        Ok(())
    }

    /// Signal completion. Repeating it is a no-op.
    pub fn finished(&self) -> Result<(), RequestError> {
        if self.terminal.close(ReplyState::Finished)? {
            self.sink.finished();
        }
        Ok(())
    }

    /// Signal failure; allowed only while open.
    pub fn error(&self, message: &str) -> Result<(), RequestError> {
        self.terminal.close(ReplyState::Errored)?;
        tracing::debug!(target: "bridge", "preview reply error: {}", message);
        self.sink.error(message);
        Ok(())
    }
}

impl Tracked for NativePreviewReply {
    const KIND: HandleKind = HandleKind::PreviewReply;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RecordingPreviewReply, RecordingSearchReply};

    fn result() -> ScopeResult {
        let category = Arc::new(Category::new("c", "C", "", "").unwrap());
        let mut result = ScopeResult::categorised(category);
        result.set_uri("test://1");
        result
    }

    #[test]
    fn test_push_after_finished_fails() {
        let sink = Arc::new(RecordingSearchReply::new());
        let reply = NativeSearchReply::new(sink.clone(), HostCapabilities::default());

        reply.push(&result()).unwrap();
        reply.finished().unwrap();
        reply.finished().unwrap();
        let err = reply.push(&result()).unwrap_err();

        assert!(err.is_request_error());
        assert_eq!(sink.results().len(), 1);
        assert_eq!(sink.finished_count(), 1);
    }

    #[test]
    fn test_error_after_finished_fails() {
        let sink = Arc::new(RecordingSearchReply::new());
        let reply = NativeSearchReply::new(sink.clone(), HostCapabilities::default());
        reply.finished().unwrap();
        assert!(reply.error("late").is_err());
        assert!(sink.error_message().is_none());
    }

    #[test]
    fn test_finished_after_error_fails() {
        let sink = Arc::new(RecordingSearchReply::new());
        let reply = NativeSearchReply::new(sink.clone(), HostCapabilities::default());
        reply.error("boom").unwrap();
        assert!(reply.finished().is_err());
        assert_eq!(reply.state(), ReplyState::Errored);
        assert_eq!(sink.finished_count(), 0);
    }

    #[test]
    fn test_filters_need_capability() {
        let sink = Arc::new(RecordingSearchReply::new());
        let caps = HostCapabilities::default().without_filters();
        let reply = NativeSearchReply::new(sink, caps);
        let err = reply.push_filters(&[], &FilterState::new()).unwrap_err();
        assert!(matches!(err, scopebridge_core::BridgeError::Capability(_)));
    }

    #[test]
    fn test_layout_registered_once() {
        let sink = Arc::new(RecordingPreviewReply::new());
        let reply = NativePreviewReply::new(sink);
        let mut layout = ColumnLayout::new(1);
        layout.add_column(["a"]).unwrap();

        reply.register_layout(std::slice::from_ref(&layout)).unwrap();
        let err = reply.register_layout(&[layout]).unwrap_err();
        assert!(matches!(
            err,
            scopebridge_core::BridgeError::Request(RequestError::LayoutAlreadyRegistered)
        ));
    }

    #[test]
    fn test_layout_after_widgets_fails() {
        let sink = Arc::new(RecordingPreviewReply::new());
        let reply = NativePreviewReply::new(sink);
        reply.push_widgets(&[PreviewWidget::new("a", "text")]).unwrap();
        let mut layout = ColumnLayout::new(1);
        layout.add_column(["a"]).unwrap();
        let err = reply.register_layout(&[layout]).unwrap_err();
        assert!(matches!(
            err,
            scopebridge_core::BridgeError::Request(RequestError::LayoutAfterWidgets)
        ));
        assert!(err.to_string().contains("before any widget"));
    }
}
