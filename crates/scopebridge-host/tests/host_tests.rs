use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scopebridge_core::{
    ActionMetadata, ActivationResponse, ActivationStatus, BridgeResult, CannedQuery,
    ColumnLayout, HandleTable, PreviewWidget, ScopeResult, SearchMetadata, Value, codec,
};
use scopebridge_host::memory::{self, MemoryHost, RunningPreview, RunningSearch};
use scopebridge_host::{
    ActionPerformer, AdapterState, CancelObserver, PreviewQueryBase, PreviewReply, ResultHandle,
    Scope, ScopeAdapter, ScopeEntry, SearchQueryBase, SearchReply,
};

/// A weather scope answering from a fixed list of towns.
#[derive(Default)]
struct Weather {
    late_push: Mutex<Option<(bool, String)>>,
    widget_pushed: Mutex<Option<Sender<()>>>,
    saw_cancel: Mutex<bool>,
}

impl Scope for Weather {
    fn search(
        &self,
        query: &CannedQuery,
        _metadata: &SearchMetadata,
        reply: &SearchReply,
        _cancel: &CancelObserver,
    ) -> BridgeResult<()> {
        let category = reply.register_category("towns", "Towns", "", "")?;
        for town in ["london", "leeds"] {
            let result = ResultHandle::new_categorised(&category)?;
            result.set("uri", format!("weather://{town}"))?;
            result.set("title", town)?;
            result.set("query", query.query_string())?;
            reply.push(&result)?;
        }
        reply.finished()?;

        let extra = ResultHandle::new_categorised(&category)?;
        extra.set("uri", "weather://late")?;
        if let Err(e) = reply.push(&extra) {
            *self.late_push.lock().unwrap() = Some((e.is_request_error(), e.to_string()));
        }
        Ok(())
    }

    fn preview(
        &self,
        result: &ResultHandle,
        _metadata: &ActionMetadata,
        reply: &PreviewReply,
        cancel: &CancelObserver,
    ) -> BridgeResult<()> {
        let mut layout = ColumnLayout::new(1);
        layout.add_column(["header", "forecast"])?;
        reply.register_layout(&[layout])?;

        let mut header = PreviewWidget::new("header", "header");
        header.add_attribute_value("title", result.title()?);
        reply.push_widgets(&[header])?;

        if let Some(tx) = self.widget_pushed.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if cancel.wait_timeout(Duration::from_secs(10)) {
            *self.saw_cancel.lock().unwrap() = true;
            return Ok(());
        }
        reply.push_widgets(&[PreviewWidget::new("forecast", "text")])
    }

    fn action_performer(&self) -> Option<&dyn ActionPerformer> {
        Some(self)
    }
}

impl ActionPerformer for Weather {
    fn perform_action(
        &self,
        result: &ResultHandle,
        _metadata: &ActionMetadata,
        widget_id: &str,
        action_id: &str,
    ) -> BridgeResult<ActivationResponse> {
        assert_eq!((widget_id, action_id), ("actions", "forecast"));
        let town: String = result.get_as("title")?;
        let mut response = ActivationResponse::for_query(CannedQuery::new("weather", &town, "week"));
        response.set_scope_data(Value::from("from-preview"));
        Ok(response)
    }
}

fn started(scope: Arc<Weather>) -> ScopeAdapter {
    let adapter = ScopeAdapter::with_table(scope, Arc::new(HandleTable::new()));
    adapter.start("weather", Arc::new(MemoryHost::new())).unwrap();
    adapter
}

fn london() -> ScopeResult {
    let mut result = ScopeResult::new();
    result.set_uri("weather://london");
    result.set_title("london");
    result
}

#[test]
fn test_query_descriptor_roundtrip() {
    let query = CannedQuery::new("weather", "london", "");
    let state_bytes = codec::encode(&Value::Object(query.filter_state().clone()));
    assert_eq!(codec::decode(&state_bytes).unwrap(), Value::object());

    let uri = query.to_uri();
    let parsed = CannedQuery::from_uri(&uri).unwrap();
    assert_eq!(parsed, query);
}

#[test]
fn test_push_after_finished_is_request_error() {
    let scope = Arc::new(Weather::default());
    let adapter = started(scope.clone());

    let query = CannedQuery::new("weather", "london", "");
    let reply = memory::run_search(adapter.search(query, SearchMetadata::new(20, None, None))).unwrap();

    let results = reply.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].uri(), "weather://london");
    assert_eq!(results[1].get("query").unwrap(), &Value::from("london"));
    assert_eq!(reply.finished_count(), 1);
    assert!(reply.error_message().is_none());

    let (is_request_error, message) = scope.late_push.lock().unwrap().clone().unwrap();
    assert!(is_request_error);
    assert!(message.contains("finished"));
    assert!(adapter.table().is_empty());
}

#[test]
fn test_search_adapter_reaches_finished() {
    let adapter = started(Arc::new(Weather::default()));
    let search = adapter.search_adapter(CannedQuery::new("weather", "", ""), SearchMetadata::new(5, None, None));
    let sink = Arc::new(memory::RecordingSearchReply::new());
    search.run(sink.clone());

    assert_eq!(search.state(), AdapterState::Finished);
    assert_eq!(sink.categories().len(), 1);
}

#[test]
fn test_cancelled_preview_ends_cancelled() {
    let scope = Arc::new(Weather::default());
    let (tx, rx) = mpsc::channel();
    *scope.widget_pushed.lock().unwrap() = Some(tx);
    let adapter = started(scope.clone());

    let preview = Arc::new(adapter.preview_adapter(london().into_shared(), ActionMetadata::default()));
    let running = RunningPreview::spawn(preview.clone() as Arc<dyn PreviewQueryBase>);

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    running.cancel();
    let reply = running.join().unwrap();

    assert!(*scope.saw_cancel.lock().unwrap());
    assert_eq!(preview.state(), AdapterState::Cancelled);
    assert_eq!(reply.widgets().len(), 1);
    assert_eq!(reply.layouts().len(), 1);
    assert_eq!(reply.finished_count(), 1);
    assert!(reply.error_message().is_none());
}

#[test]
fn test_cancel_from_host_reaches_search() {
    struct Waiting;

    impl Scope for Waiting {
        fn search(
            &self,
            _query: &CannedQuery,
            _metadata: &SearchMetadata,
            _reply: &SearchReply,
            cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            while !cancel.wait_timeout(Duration::from_millis(5)) {}
            Ok(())
        }

        fn preview(
            &self,
            _result: &ResultHandle,
            _metadata: &ActionMetadata,
            reply: &PreviewReply,
            _cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            reply.finished()
        }
    }

    let adapter = ScopeAdapter::with_table(Arc::new(Waiting), Arc::new(HandleTable::new()));
    let running = RunningSearch::spawn(Arc::from(
        adapter.search(CannedQuery::new("w", "", ""), SearchMetadata::default()),
    ));
    std::thread::sleep(Duration::from_millis(20));
    running.cancel();
    running.cancel();
    let reply = running.join().unwrap();
    assert_eq!(reply.finished_count(), 1);
}

#[test]
fn test_search_finished_before_cancel_stays_finished() {
    struct Early(Mutex<Option<Sender<()>>>);

    impl Scope for Early {
        fn search(
            &self,
            _query: &CannedQuery,
            _metadata: &SearchMetadata,
            reply: &SearchReply,
            cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            reply.finished()?;
            if let Some(tx) = self.0.lock().unwrap().take() {
                let _ = tx.send(());
            }
            cancel.wait_timeout(Duration::from_secs(10));
            Ok(())
        }

        fn preview(
            &self,
            _result: &ResultHandle,
            _metadata: &ActionMetadata,
            reply: &PreviewReply,
            _cancel: &CancelObserver,
        ) -> BridgeResult<()> {
            reply.finished()
        }
    }

    let (tx, rx) = mpsc::channel();
    let adapter = ScopeAdapter::with_table(Arc::new(Early(Mutex::new(Some(tx)))), Arc::new(HandleTable::new()));
    let search = Arc::new(adapter.search_adapter(CannedQuery::new("early", "", ""), SearchMetadata::default()));
    let running = RunningSearch::spawn(search.clone() as Arc<dyn SearchQueryBase>);

    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    running.cancel();
    let reply = running.join().unwrap();

    assert_eq!(search.state(), AdapterState::Finished);
    assert_eq!(reply.finished_count(), 1);
    assert!(reply.error_message().is_none());
    assert!(adapter.table().is_empty());
}

#[test]
fn test_widget_action_returns_follow_up_query() {
    let adapter = started(Arc::new(Weather::default()));
    let activation = adapter.perform_action(london().into_shared(), ActionMetadata::default(), "actions", "forecast");
    let response = activation.activate().unwrap();

    let decoded = ActivationResponse::from_value(&codec::decode(&codec::encode(&response.to_value())).unwrap())
        .unwrap();
    assert_eq!(decoded.status(), ActivationStatus::PerformQuery);
    let query = decoded.query().unwrap();
    assert_eq!(query.scope_id(), "weather");
    assert_eq!(query.query_string(), "london");
    assert_eq!(query.department_id(), "week");
    assert_eq!(decoded.scope_data(), &Value::from("from-preview"));
}

#[test]
fn test_plain_activation_defaults_to_not_handled() {
    let adapter = started(Arc::new(Weather::default()));
    let response = adapter
        .activate(london().into_shared(), ActionMetadata::default())
        .activate()
        .unwrap();
    assert_eq!(response.status(), ActivationStatus::NotHandled);
}
