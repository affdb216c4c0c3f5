//! An in-process host.
//!
//! Recording sinks keep every reply event so a run can be inspected or
//! printed afterwards, and [`MemoryHost`] serves the per-scope runtime
//! services from plain values. Queries run on worker threads the way the
//! real host runs them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use scopebridge_core::{
    Category, ColumnLayout, DepartmentRef, Filter, FilterState, HostError, PreviewWidget,
    ScopeMetadata, ScopeResult, Value, codec,
};

use crate::host::{
    HostCapabilities, HostRuntime, PreviewQueryBase, PreviewReplySink, SearchQueryBase,
    SearchReplySink,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn event(name: &str, fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut obj = BTreeMap::new();
    obj.insert("event".to_string(), Value::from(name));
    for (key, value) in fields {
        obj.insert(key.to_string(), value);
    }
    Value::Object(obj)
}

#[derive(Debug, Default)]
struct SearchLog {
    events: Vec<Value>,
    categories: Vec<Category>,
    departments: Vec<Value>,
    results: Vec<ScopeResult>,
    filters: Vec<(Vec<Filter>, FilterState)>,
    finished: usize,
    error: Option<String>,
}

/// Records the output of one search.
#[derive(Debug, Default)]
pub struct RecordingSearchReply {
    log: Mutex<SearchLog>,
}

impl RecordingSearchReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event in arrival order.
    pub fn events(&self) -> Vec<Value> {
        lock(&self.log).events.clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        lock(&self.log).categories.clone()
    }

    /// Registered department trees in structured form.
    pub fn departments(&self) -> Vec<Value> {
        lock(&self.log).departments.clone()
    }

    pub fn results(&self) -> Vec<ScopeResult> {
        lock(&self.log).results.clone()
    }

    pub fn filters(&self) -> Vec<(Vec<Filter>, FilterState)> {
        lock(&self.log).filters.clone()
    }

    pub fn finished_count(&self) -> usize {
        lock(&self.log).finished
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.log).error.clone()
    }
}

impl SearchReplySink for RecordingSearchReply {
    fn register_category(&self, category: &Category) -> Result<(), HostError> {
        let template = category.renderer_template().clone();
        let mut log = lock(&self.log);
        log.events.push(event(
            "category",
            [
                ("id", Value::from(category.id())),
                ("title", Value::from(category.title())),
                ("renderer_template", template),
            ],
        ));
        log.categories.push(category.clone());
        Ok(())
    }

    fn register_departments(&self, root: &DepartmentRef) -> Result<(), HostError> {
        let tree = root.to_value().map_err(|e| HostError::new(e.to_string()))?;
        let mut log = lock(&self.log);
        log.events.push(event("departments", [("root", tree.clone())]));
        log.departments.push(tree);
        Ok(())
    }

    fn push(&self, result: &ScopeResult) -> Result<(), HostError> {
        let mut log = lock(&self.log);
        log.events.push(event("result", [("result", result.to_value())]));
        log.results.push(result.clone());
        Ok(())
    }

    fn push_filters(&self, filters: &[Filter], state: &FilterState) -> Result<(), HostError> {
        let encoded = codec::to_value(filters).map_err(|e| HostError::new(e.to_string()))?;
        let mut log = lock(&self.log);
        log.events.push(event(
            "filters",
            [("filters", encoded), ("state", Value::Object(state.clone()))],
        ));
        log.filters.push((filters.to_vec(), state.clone()));
        Ok(())
    }

    fn finished(&self) {
        let mut log = lock(&self.log);
        log.events.push(event("finished", []));
        log.finished += 1;
    }

    fn error(&self, message: &str) {
        let mut log = lock(&self.log);
        log.events.push(event("error", [("message", Value::from(message))]));
        log.error = Some(message.to_string());
    }
}

#[derive(Debug, Default)]
struct PreviewLog {
    events: Vec<Value>,
    layouts: Vec<ColumnLayout>,
    widgets: Vec<PreviewWidget>,
    attributes: Vec<(String, Value)>,
    finished: usize,
    error: Option<String>,
}

/// Records the output of one preview.
#[derive(Debug, Default)]
pub struct RecordingPreviewReply {
    log: Mutex<PreviewLog>,
}

impl RecordingPreviewReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event in arrival order.
    pub fn events(&self) -> Vec<Value> {
        lock(&self.log).events.clone()
    }

    pub fn layouts(&self) -> Vec<ColumnLayout> {
        lock(&self.log).layouts.clone()
    }

    pub fn widgets(&self) -> Vec<PreviewWidget> {
        lock(&self.log).widgets.clone()
    }

    pub fn attributes(&self) -> Vec<(String, Value)> {
        lock(&self.log).attributes.clone()
    }

    pub fn finished_count(&self) -> usize {
        lock(&self.log).finished
    }

    pub fn error_message(&self) -> Option<String> {
        lock(&self.log).error.clone()
    }
}

impl PreviewReplySink for RecordingPreviewReply {
    fn register_layout(&self, layouts: &[ColumnLayout]) -> Result<(), HostError> {
        let mut log = lock(&self.log);
        log.events.push(event(
            "layouts",
            [(
                "layouts",
                Value::Array(layouts.iter().map(ColumnLayout::to_value).collect()),
            )],
        ));
        log.layouts.extend_from_slice(layouts);
        Ok(())
    }

    fn push_widgets(&self, widgets: &[PreviewWidget]) -> Result<(), HostError> {
        let mut log = lock(&self.log);
        log.events.push(event(
            "widgets",
            [(
                "widgets",
                Value::Array(widgets.iter().map(PreviewWidget::to_value).collect()),
            )],
        ));
        log.widgets.extend_from_slice(widgets);
        Ok(())
    }

    fn push_attribute(&self, key: &str, value: &Value) -> Result<(), HostError> {
        let mut log = lock(&self.log);
        log.events.push(event(
            "attribute",
            [("key", Value::from(key)), ("value", value.clone())],
        ));
        log.attributes.push((key.to_string(), value.clone()));
        Ok(())
    }

    fn finished(&self) {
        let mut log = lock(&self.log);
        log.events.push(event("finished", []));
        log.finished += 1;
    }

    fn error(&self, message: &str) {
        let mut log = lock(&self.log);
        log.events.push(event("error", [("message", Value::from(message))]));
        log.error = Some(message.to_string());
    }
}

/// Runtime services backed by plain values.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    capabilities: HostCapabilities,
    scope_directory: PathBuf,
    cache_directory: PathBuf,
    tmp_directory: PathBuf,
    settings: Value,
    registry: Vec<ScopeMetadata>,
    registry_error: Option<String>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        let root = std::env::temp_dir().join("scopebridge");
        Self {
            capabilities: HostCapabilities::default(),
            scope_directory: root.join("scopes"),
            cache_directory: root.join("cache"),
            tmp_directory: root.join("tmp"),
            settings: Value::object(),
            registry: Vec::new(),
            registry_error: None,
        }
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_scope_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scope_directory = dir.into();
        self
    }

    pub fn with_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = dir.into();
        self
    }

    pub fn with_tmp_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_directory = dir.into();
        self
    }

    pub fn with_settings(mut self, settings: impl Into<Value>) -> Self {
        self.settings = settings.into();
        self
    }

    pub fn with_registry(mut self, registry: Vec<ScopeMetadata>) -> Self {
        self.registry = registry;
        self
    }

    /// Make registry listing fail with `message`.
    pub fn with_registry_error(mut self, message: impl Into<String>) -> Self {
        self.registry_error = Some(message.into());
        self
    }
}

impl HostRuntime for MemoryHost {
    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    fn scope_directory(&self) -> PathBuf {
        self.scope_directory.clone()
    }

    fn cache_directory(&self) -> PathBuf {
        self.cache_directory.clone()
    }

    fn tmp_directory(&self) -> PathBuf {
        self.tmp_directory.clone()
    }

    fn settings(&self) -> Value {
        self.settings.clone()
    }

    fn registry(&self) -> Result<Vec<ScopeMetadata>, HostError> {
        match &self.registry_error {
            Some(message) => Err(HostError::new(message.clone())),
            None => Ok(self.registry.clone()),
        }
    }
}

/// A search running on its own worker thread.
pub struct RunningSearch {
    query: Arc<dyn SearchQueryBase>,
    reply: Arc<RecordingSearchReply>,
    worker: JoinHandle<()>,
}

impl RunningSearch {
    /// Start `query` on a new worker thread.
    pub fn spawn(query: Arc<dyn SearchQueryBase>) -> Self {
        let reply = Arc::new(RecordingSearchReply::new());
        let worker = {
            let query = query.clone();
            let sink: Arc<dyn SearchReplySink> = reply.clone();
            std::thread::spawn(move || query.run(sink))
        };
        Self {
            query,
            reply,
            worker,
        }
    }

    /// Forward a cancellation from the host side.
    pub fn cancel(&self) {
        self.query.cancelled();
    }

    pub fn reply(&self) -> &Arc<RecordingSearchReply> {
        &self.reply
    }

    /// Wait for the worker to return.
    pub fn join(self) -> Result<Arc<RecordingSearchReply>, HostError> {
        self.worker
            .join()
            .map_err(|_| HostError::new("search worker panicked"))?;
        Ok(self.reply)
    }
}

/// A preview running on its own worker thread.
pub struct RunningPreview {
    query: Arc<dyn PreviewQueryBase>,
    reply: Arc<RecordingPreviewReply>,
    worker: JoinHandle<()>,
}

impl RunningPreview {
    /// Start `query` on a new worker thread.
    pub fn spawn(query: Arc<dyn PreviewQueryBase>) -> Self {
        let reply = Arc::new(RecordingPreviewReply::new());
        let worker = {
            let query = query.clone();
            let sink: Arc<dyn PreviewReplySink> = reply.clone();
            std::thread::spawn(move || query.run(sink))
        };
        Self {
            query,
            reply,
            worker,
        }
    }

    /// Forward a cancellation from the host side.
    pub fn cancel(&self) {
        self.query.cancelled();
    }

    pub fn reply(&self) -> &Arc<RecordingPreviewReply> {
        &self.reply
    }

    /// Wait for the worker to return.
    pub fn join(self) -> Result<Arc<RecordingPreviewReply>, HostError> {
        self.worker
            .join()
            .map_err(|_| HostError::new("preview worker panicked"))?;
        Ok(self.reply)
    }
}

/// Run a search to completion on a worker thread.
pub fn run_search(query: Box<dyn SearchQueryBase>) -> Result<Arc<RecordingSearchReply>, HostError> {
    RunningSearch::spawn(Arc::from(query)).join()
}

/// Run a preview to completion on a worker thread.
pub fn run_preview(query: Box<dyn PreviewQueryBase>) -> Result<Arc<RecordingPreviewReply>, HostError> {
    RunningPreview::spawn(Arc::from(query)).join()
}
