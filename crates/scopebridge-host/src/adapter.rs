//! Lifecycle adapters.
//!
//! One adapter is built per request. It satisfies the host's query interface
//! and, when the host runs it, crosses into scope logic with handle-backed
//! reply objects and a cancellation observer. Each adapter moves through
//! `Created -> Running -> Finished | Cancelled | Errored` exactly once.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use scopebridge_core::{
    ActionMetadata, ActivationResponse, BridgeError, BridgeResult, CannedQuery, HandleTable,
    LifecycleError, RequestError, ResultRef, SearchMetadata,
};
use strum::{Display, FromRepr, IntoStaticStr};

use crate::cancel::{CancelObserver, CancelSignal};
use crate::host::{
    ActivationQueryBase, HostCapabilities, PreviewQueryBase, PreviewReplySink, SearchQueryBase,
    SearchReplySink,
};
use crate::native::{NativePreviewReply, NativeSearchReply, ReplyState};
use crate::objects::ResultHandle;
use crate::reply::{PreviewReply, SearchReply};
use crate::scope::Scope;

/// Where an adapter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum AdapterState {
    Created = 0,
    Running = 1,
    Finished = 2,
    Cancelled = 3,
    Errored = 4,
}

impl AdapterState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Errored)
    }
}

#[derive(Debug)]
struct Lifecycle(AtomicU8);

impl Lifecycle {
    fn new() -> Self {
        Self(AtomicU8::new(AdapterState::Created as u8))
    }

    fn state(&self) -> AdapterState {
        AdapterState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(AdapterState::Errored)
    }

    /// Enter `Running`; an adapter runs at most once.
    fn begin(&self, operation: &'static str) -> Result<(), LifecycleError> {
        self.0
            .compare_exchange(
                AdapterState::Created as u8,
                AdapterState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|current| LifecycleError::InvalidTransition {
                state: AdapterState::from_repr(current)
                    .unwrap_or(AdapterState::Errored)
                    .into(),
                operation,
            })
    }

    fn settle(&self, state: AdapterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Call into scope logic; a panic becomes a scope error.
fn call_scope<T>(operation: &str, f: impl FnOnce() -> BridgeResult<T>) -> BridgeResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(BridgeError::scope(format!(
            "{} panicked: {}",
            operation,
            panic_message(payload)
        )))
    })
}

/// The terminal half shared by both native reply kinds.
trait Terminal {
    fn state(&self) -> ReplyState;
    fn finished(&self) -> Result<(), RequestError>;
    fn error(&self, message: &str) -> Result<(), RequestError>;
}

impl Terminal for NativeSearchReply {
    fn state(&self) -> ReplyState {
        NativeSearchReply::state(self)
    }

    fn finished(&self) -> Result<(), RequestError> {
        NativeSearchReply::finished(self)
    }

    fn error(&self, message: &str) -> Result<(), RequestError> {
        NativeSearchReply::error(self, message)
    }
}

impl Terminal for NativePreviewReply {
    fn state(&self) -> ReplyState {
        NativePreviewReply::state(self)
    }

    fn finished(&self) -> Result<(), RequestError> {
        NativePreviewReply::finished(self)
    }

    fn error(&self, message: &str) -> Result<(), RequestError> {
        NativePreviewReply::error(self, message)
    }
}

/// Report a terminal call on the reply that did not go through.
fn settle_reply(operation: &str, result: Result<(), RequestError>) {
    if let Err(e) = result {
        tracing::warn!(target: "scope", "{} reply could not be closed: {}", operation, e);
    }
}

/// Close `reply` if scope logic left it open and pick the adapter's end state.
///
/// A reply the scope already closed keeps its outcome even when a cancel
/// arrived afterwards.
fn conclude(
    operation: &str,
    reply: &dyn Terminal,
    outcome: BridgeResult<()>,
    cancelled: bool,
) -> AdapterState {
    if cancelled {
        if let Err(e) = &outcome {
            tracing::debug!(target: "scope", "{} failed after cancellation: {}", operation, e);
        }
        match reply.state() {
            ReplyState::Finished => {
                tracing::debug!(target: "scope", "{} finished before cancellation", operation);
                return AdapterState::Finished;
            }
            ReplyState::Errored => return AdapterState::Errored,
            ReplyState::Open => {
                settle_reply(operation, reply.finished());
                tracing::info!(target: "scope", "{} cancelled", operation);
                return AdapterState::Cancelled;
            }
        }
    }
    let open = reply.state() == ReplyState::Open;
    match outcome {
        Err(e) => {
            let message = e.boundary_message();
            tracing::warn!(target: "scope", "{} failed: {}", operation, message);
            if open {
                settle_reply(operation, reply.error(&message));
            }
            AdapterState::Errored
        }
        Ok(()) => {
            if open {
                settle_reply(operation, reply.finished());
            }
            if reply.state() == ReplyState::Errored {
                AdapterState::Errored
            } else {
                AdapterState::Finished
            }
        }
    }
}

/// Runs one search.
pub struct QueryAdapter {
    scope: Arc<dyn Scope>,
    table: Arc<HandleTable>,
    capabilities: HostCapabilities,
    query: CannedQuery,
    metadata: SearchMetadata,
    cancel: CancelSignal,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for QueryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryAdapter")
            .field("query", &self.query)
            .field("state", &self.state())
            .finish()
    }
}

impl QueryAdapter {
    pub fn new(
        scope: Arc<dyn Scope>,
        table: Arc<HandleTable>,
        capabilities: HostCapabilities,
        query: CannedQuery,
        metadata: SearchMetadata,
    ) -> Self {
        Self {
            scope,
            table,
            capabilities,
            query,
            metadata,
            cancel: CancelSignal::new(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    pub fn query(&self) -> &CannedQuery {
        &self.query
    }

    fn search(&self, reply: &SearchReply, cancel: &CancelObserver) -> BridgeResult<()> {
        call_scope("search", || {
            self.scope.search(&self.query, &self.metadata, reply, cancel)
        })
    }
}

impl SearchQueryBase for QueryAdapter {
    fn run(&self, sink: Arc<dyn SearchReplySink>) {
        if let Err(e) = self.lifecycle.begin("run") {
            tracing::warn!(target: "scope", "search not run: {}", e);
            sink.error(&e.to_string());
            return;
        }
        tracing::debug!(target: "scope", "search '{}' in {}", self.query.query_string(), self.query.scope_id());
        let native = Arc::new(NativeSearchReply::new(sink, self.capabilities));
        let outcome = match SearchReply::new(&self.table, native.clone()) {
            Ok(reply) => self.search(&reply, &self.cancel.observer()),
            Err(e) => Err(e.into()),
        };
        let state = conclude("search", native.as_ref(), outcome, self.cancel.is_cancelled());
        self.lifecycle.settle(state);
    }

    fn cancelled(&self) {
        if self.cancel.cancel() {
            tracing::debug!(target: "scope", "search '{}' cancel requested", self.query.query_string());
        }
    }
}

/// Renders one result.
pub struct PreviewAdapter {
    scope: Arc<dyn Scope>,
    table: Arc<HandleTable>,
    result: ResultRef,
    metadata: ActionMetadata,
    cancel: CancelSignal,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for PreviewAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewAdapter")
            .field("state", &self.state())
            .finish()
    }
}

impl PreviewAdapter {
    pub fn new(
        scope: Arc<dyn Scope>,
        table: Arc<HandleTable>,
        result: ResultRef,
        metadata: ActionMetadata,
    ) -> Self {
        Self {
            scope,
            table,
            result,
            metadata,
            cancel: CancelSignal::new(),
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    fn preview(&self, reply: &PreviewReply, cancel: &CancelObserver) -> BridgeResult<()> {
        let result = ResultHandle::from_result(&self.table, self.result.clone())?;
        call_scope("preview", || {
            self.scope.preview(&result, &self.metadata, reply, cancel)
        })
    }
}

impl PreviewQueryBase for PreviewAdapter {
    fn run(&self, sink: Arc<dyn PreviewReplySink>) {
        if let Err(e) = self.lifecycle.begin("run") {
            tracing::warn!(target: "scope", "preview not run: {}", e);
            sink.error(&e.to_string());
            return;
        }
        let native = Arc::new(NativePreviewReply::new(sink));
        let outcome = match PreviewReply::new(&self.table, native.clone()) {
            Ok(reply) => self.preview(&reply, &self.cancel.observer()),
            Err(e) => Err(e.into()),
        };
        let state = conclude("preview", native.as_ref(), outcome, self.cancel.is_cancelled());
        self.lifecycle.settle(state);
    }

    fn cancelled(&self) {
        if self.cancel.cancel() {
            tracing::debug!(target: "scope", "preview cancel requested");
        }
    }
}

/// Which activation the host asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationMode {
    /// The user activated the result itself.
    Activate,
    /// The user triggered an action on a preview widget.
    PerformAction { widget_id: String, action_id: String },
}

/// Handles one activation synchronously.
pub struct ActivationAdapter {
    scope: Arc<dyn Scope>,
    table: Arc<HandleTable>,
    result: ResultRef,
    metadata: ActionMetadata,
    mode: ActivationMode,
    lifecycle: Lifecycle,
}

impl std::fmt::Debug for ActivationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivationAdapter")
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

impl ActivationAdapter {
    pub fn new(
        scope: Arc<dyn Scope>,
        table: Arc<HandleTable>,
        result: ResultRef,
        metadata: ActionMetadata,
        mode: ActivationMode,
    ) -> Self {
        Self {
            scope,
            table,
            result,
            metadata,
            mode,
            lifecycle: Lifecycle::new(),
        }
    }

    pub fn mode(&self) -> &ActivationMode {
        &self.mode
    }

    pub fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    fn dispatch(&self) -> BridgeResult<ActivationResponse> {
        let result = ResultHandle::from_result(&self.table, self.result.clone())?;
        match &self.mode {
            ActivationMode::Activate => match self.scope.activator() {
                Some(activator) => call_scope("activate", || activator.activate(&result, &self.metadata)),
                None => Ok(ActivationResponse::not_handled()),
            },
            ActivationMode::PerformAction {
                widget_id,
                action_id,
            } => match self.scope.action_performer() {
                Some(performer) => call_scope("perform_action", || {
                    performer.perform_action(&result, &self.metadata, widget_id, action_id)
                }),
                None => Ok(ActivationResponse::not_handled()),
            },
        }
    }
}

impl ActivationQueryBase for ActivationAdapter {
    fn activate(&self) -> BridgeResult<ActivationResponse> {
        self.lifecycle.begin("activate")?;
        match self.dispatch() {
            Ok(response) => {
                tracing::debug!(target: "scope", "activation answered {}", response.status());
                self.lifecycle.settle(AdapterState::Finished);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(target: "scope", "activation failed: {}", e);
                self.lifecycle.settle(AdapterState::Errored);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scopebridge_core::{ActivationStatus, ScopeResult};

    use super::*;
    use crate::memory::{RecordingPreviewReply, RecordingSearchReply};
    use crate::scope::Activator;

    struct Slow;

    impl Scope for Slow {
        fn search(
            &self,
            _query: &CannedQuery,
            _metadata: &SearchMetadata,
            _reply: &SearchReply,
            cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            cancel.wait_timeout(Duration::from_secs(10));
            Ok(())
        }

        fn preview(
            &self,
            _result: &ResultHandle,
            _metadata: &ActionMetadata,
            _reply: &PreviewReply,
            _cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            panic!("preview exploded");
        }

        fn activator(&self) -> Option<&dyn Activator> {
            Some(self)
        }
    }

    impl Activator for Slow {
        fn activate(&self, _result: &ResultHandle, _metadata: &ActionMetadata) -> BridgeResult<ActivationResponse> {
            Err(BridgeError::scope("cannot open"))
        }
    }

    fn search_adapter(table: &Arc<HandleTable>) -> QueryAdapter {
        QueryAdapter::new(
            Arc::new(Slow),
            table.clone(),
            HostCapabilities::default(),
            CannedQuery::new("slow", "q", ""),
            SearchMetadata::new(10, None, None),
        )
    }

    #[test]
    fn test_cancel_before_run_ends_cancelled() {
        let table = Arc::new(HandleTable::new());
        let adapter = search_adapter(&table);
        let sink = Arc::new(RecordingSearchReply::new());

        adapter.cancelled();
        adapter.cancelled();
        adapter.run(sink.clone());

        assert_eq!(adapter.state(), AdapterState::Cancelled);
        assert_eq!(sink.finished_count(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_conclude_keeps_reply_closed_before_cancel() {
        let sink = Arc::new(RecordingSearchReply::new());
        let native = NativeSearchReply::new(sink.clone(), HostCapabilities::default());
        native.finished().unwrap();
        assert_eq!(conclude("search", &native, Ok(()), true), AdapterState::Finished);
        assert_eq!(sink.finished_count(), 1);

        let sink = Arc::new(RecordingSearchReply::new());
        let native = NativeSearchReply::new(sink.clone(), HostCapabilities::default());
        native.error("no network").unwrap();
        assert_eq!(conclude("search", &native, Ok(()), true), AdapterState::Errored);
        assert_eq!(sink.finished_count(), 0);

        let sink = Arc::new(RecordingSearchReply::new());
        let native = NativeSearchReply::new(sink.clone(), HostCapabilities::default());
        assert_eq!(conclude("search", &native, Ok(()), true), AdapterState::Cancelled);
        assert_eq!(sink.finished_count(), 1);
    }

    #[test]
    fn test_second_run_is_rejected() {
        let table = Arc::new(HandleTable::new());
        let adapter = search_adapter(&table);
        adapter.cancelled();
        adapter.run(Arc::new(RecordingSearchReply::new()));

        let second = Arc::new(RecordingSearchReply::new());
        adapter.run(second.clone());
        assert!(second.error_message().is_some());
        assert_eq!(adapter.state(), AdapterState::Cancelled);
    }

    #[test]
    fn test_panic_becomes_reply_error() {
        let table = Arc::new(HandleTable::new());
        let adapter = PreviewAdapter::new(
            Arc::new(Slow),
            table.clone(),
            ScopeResult::new().into_shared(),
            ActionMetadata::default(),
        );
        let sink = Arc::new(RecordingPreviewReply::new());
        adapter.run(sink.clone());

        assert_eq!(adapter.state(), AdapterState::Errored);
        let message = sink.error_message().unwrap();
        assert!(message.contains("preview exploded"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_activation_failure_propagates() {
        let table = Arc::new(HandleTable::new());
        let adapter = ActivationAdapter::new(
            Arc::new(Slow),
            table,
            ScopeResult::new().into_shared(),
            ActionMetadata::default(),
            ActivationMode::Activate,
        );
        let err = adapter.activate().unwrap_err();
        assert_eq!(err.boundary_message(), "cannot open");
        assert_eq!(adapter.state(), AdapterState::Errored);
        assert!(adapter.activate().is_err());
    }

    #[test]
    fn test_missing_performer_is_not_handled() {
        let adapter = ActivationAdapter::new(
            Arc::new(Slow),
            Arc::new(HandleTable::new()),
            ScopeResult::new().into_shared(),
            ActionMetadata::default(),
            ActivationMode::PerformAction {
                widget_id: "w".into(),
                action_id: "open".into(),
            },
        );
        let response = adapter.activate().unwrap();
        assert_eq!(response.status(), ActivationStatus::NotHandled);
        assert_eq!(adapter.state(), AdapterState::Finished);
    }
}
