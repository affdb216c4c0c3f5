use std::path::Path;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scopebridge_core::{
    ActionMetadata, ActivationStatus, CannedQuery, HandleTable, ScopeMetadata, ScopeResult,
    SearchMetadata, Value,
};
use scopebridge_host::memory::{self, MemoryHost, RecordingSearchReply, RunningPreview};
use scopebridge_host::{
    AdapterState, HostVersion, PreviewQueryBase, ScopeAdapter, ScopeEntry, SearchQueryBase,
};
use scopebridge_plugin::{LoadedScope, PluginError, ScopeConfig, ScopeLoader, default_loader};
use tempfile::TempDir;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const WEATHER_MANIFEST: &str = r#"
name = "weather"
display_name = "Weather"

[settings]
units = "imperial"
"#;

const WEATHER_SCRIPT: &str = r#"
local scope = {}
local towns = scopes.json_decode(assert(scopes.read_file("towns.json")))
local units = "metric"
local late_error = nil
local registry = {}

function scope.start(base)
    units = base:settings().units or units
    for _, entry in ipairs((base:registry())) do
        table.insert(registry, (entry:scope_id()))
    end
end

function scope.search(query, metadata, reply, cancel)
    if query.query_string == "explode" then
        error("boom")
    end
    local category = assert(reply:register_category("towns", "Towns"))
    for _, town in ipairs(towns) do
        local result = assert(scopes.result(category))
        result:set("uri", "weather://" .. town)
        result:set("title", town)
        result:set("units", units)
        result:set("cardinality", metadata.cardinality)
        assert(reply:push(result))
    end
    assert(reply:finished())

    local late = assert(scopes.result(category))
    late:set("uri", "weather://late")
    local ok, err = reply:push(late)
    late_error = err
end

function scope.preview(result, metadata, reply, cancel)
    local title = (result:title())
    assert(reply:register_layout({ { num_columns = 1, columns = { { "header", "forecast" } } } }))
    assert(reply:push_widgets({ id = "header", type = "header", title = title }))
    assert(reply:push_attr("town", title))
    if result:uri() == "weather://slow" and cancel:wait(10000) then
        return
    end
    assert(reply:push_widgets({ { id = "forecast", type = "text", text = "sunny" } }))
end

function scope.activate(result, metadata)
    local response = scopes.response("not_handled")
    response:set_scope_data({ late_error = late_error, registry = registry })
    return response
end

function scope.perform_action(result, metadata, widget_id, action_id)
    local town = (result:get("title"))
    local response = scopes.response_for_query(scopes.query("weather", town, "week"))
    response:set_scope_data(widget_id .. "/" .. action_id)
    return response
end

return scope
"#;

const MINIMAL_SCRIPT: &str = r#"
local scope = {}
function scope.search(query, metadata, reply, cancel) end
function scope.preview(result, metadata, reply, cancel) end
return scope
"#;

fn write_scope(root: &Path, dir: &str, manifest: &str, script: &str) {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join("scope.toml"), manifest).unwrap();
    std::fs::write(path.join("main.lua"), script).unwrap();
}

fn fixture() -> TempDir {
    let root = TempDir::new().unwrap();
    write_scope(root.path(), "weather", WEATHER_MANIFEST, WEATHER_SCRIPT);
    std::fs::write(root.path().join("weather/towns.json"), r#"["london", "leeds"]"#).unwrap();
    root
}

fn loader(root: &Path) -> ScopeLoader {
    default_loader(ScopeConfig::default().with_scope_dir(root))
        .unwrap()
        .with_table(Arc::new(HandleTable::new()))
}

fn weather(root: &Path) -> LoadedScope {
    loader(root).load_scope(&root.join("weather")).unwrap().unwrap()
}

fn started(scope: &LoadedScope, registry: Vec<ScopeMetadata>) -> ScopeAdapter {
    let host = MemoryHost::new()
        .with_scope_directory(&scope.path)
        .with_settings(scope.manifest.settings_value())
        .with_registry(registry);
    let adapter = scope.adapter();
    adapter.start(scope.id(), Arc::new(host)).unwrap();
    adapter
}

fn result(uri: &str, title: &str) -> ScopeResult {
    let mut result = ScopeResult::new();
    result.set_uri(uri);
    result.set_title(title);
    result
}

#[test]
fn test_discovery_skips_unloadable_scopes() {
    let root = fixture();
    write_scope(root.path(), "disabled", "name = \"disabled\"", MINIMAL_SCRIPT);
    write_scope(
        root.path(),
        "future",
        "name = \"future\"\nmin_host_version = \"9.0\"",
        MINIMAL_SCRIPT,
    );
    write_scope(root.path(), "broken", "name = \"broken\"", "return {");
    write_scope(root.path(), "python", "name = \"python\"\nruntime = \"python\"", MINIMAL_SCRIPT);
    std::fs::create_dir_all(root.path().join("notes")).unwrap();

    let config = ScopeConfig::default()
        .with_scope_dir(root.path())
        .disable_scope("disabled");
    let loader = default_loader(config).unwrap();

    let ids: Vec<String> = loader
        .discover_scopes()
        .unwrap()
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(ids, vec!["weather"]);

    assert!(matches!(
        loader.load_scope(&root.path().join("future")),
        Err(PluginError::IncompatibleHost { .. })
    ));
    assert!(matches!(
        loader.load_scope(&root.path().join("python")),
        Err(PluginError::RuntimeNotAvailable { .. })
    ));
    assert!(loader.load_scope(&root.path().join("disabled")).unwrap().is_none());
}

#[test]
fn test_newer_host_accepts_scope() {
    let root = fixture();
    write_scope(
        root.path(),
        "future",
        "name = \"future\"\nmin_host_version = \"0.7\"",
        MINIMAL_SCRIPT,
    );
    let loader = loader(root.path()).with_host_version(HostVersion::new(0, 7, 1));
    assert!(loader.load_scope(&root.path().join("future")).unwrap().is_some());
}

#[test]
fn test_module_without_preview_fails_to_load() {
    let root = fixture();
    write_scope(
        root.path(),
        "half",
        "name = \"half\"",
        "return { search = function() end }",
    );
    let Err(err) = loader(root.path()).load_scope(&root.path().join("half")) else {
        panic!("a scope without preview loaded");
    };
    assert!(err.to_string().contains("preview"));
}

#[test]
fn test_lua_search_streams_results() {
    let root = fixture();
    let scope = weather(root.path());
    let adapter = started(&scope, vec![]);

    let query = CannedQuery::new("weather", "", "");
    let reply = memory::run_search(adapter.search(query, SearchMetadata::new(20, None, None))).unwrap();

    let results = reply.results();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].uri(), "weather://london");
    assert_eq!(results[1].title(), "leeds");
    assert_eq!(results[0].get("units").unwrap(), &Value::from("imperial"));
    assert_eq!(results[0].get("cardinality").unwrap(), &Value::Integer(20));
    assert_eq!(reply.categories()[0].id(), "towns");
    assert_eq!(reply.finished_count(), 1);
    assert!(adapter.table().is_empty());
}

#[test]
fn test_lua_push_after_finished_returns_message() {
    let root = fixture();
    let scope = weather(root.path());
    let registry = vec![
        ScopeMetadata::builder().scope_id("weather").build().unwrap(),
        ScopeMetadata::builder().scope_id("news").build().unwrap(),
    ];
    let adapter = started(&scope, registry);

    memory::run_search(adapter.search(CannedQuery::new("weather", "", ""), SearchMetadata::default()))
        .unwrap();

    let response = adapter
        .activate(result("weather://london", "london").into_shared(), ActionMetadata::default())
        .activate()
        .unwrap();
    assert_eq!(response.status(), ActivationStatus::NotHandled);

    let late_error = response.scope_data().get("late_error").and_then(Value::as_str).unwrap();
    assert!(late_error.contains("finished"));
    assert_eq!(
        response.scope_data().get("registry"),
        Some(&Value::Array(vec![Value::from("weather"), Value::from("news")]))
    );
}

#[test]
fn test_lua_error_is_reported_on_reply() {
    let root = fixture();
    let scope = weather(root.path());
    let adapter = started(&scope, vec![]);

    let search = adapter.search_adapter(CannedQuery::new("weather", "explode", ""), SearchMetadata::default());
    let sink = Arc::new(RecordingSearchReply::new());
    search.run(sink.clone());

    assert_eq!(search.state(), AdapterState::Errored);
    assert!(sink.error_message().unwrap().contains("boom"));
    assert_eq!(sink.finished_count(), 0);
}

#[test]
fn test_lua_preview_builds_widgets() {
    let root = fixture();
    let scope = weather(root.path());
    let adapter = started(&scope, vec![]);

    let reply = memory::run_preview(adapter.preview(
        result("weather://leeds", "leeds").into_shared(),
        ActionMetadata::default(),
    ))
    .unwrap();

    assert_eq!(reply.layouts().len(), 1);
    assert_eq!(reply.layouts()[0].column(0).unwrap(), ["header", "forecast"]);
    let widgets = reply.widgets();
    let ids: Vec<&str> = widgets.iter().map(|w| w.id()).collect();
    assert_eq!(ids, vec!["header", "forecast"]);
    assert_eq!(reply.attributes(), vec![("town".to_string(), Value::from("leeds"))]);
    assert_eq!(reply.finished_count(), 1);
}

#[test]
fn test_lua_preview_observes_cancel() {
    let root = fixture();
    let scope = weather(root.path());
    let adapter = started(&scope, vec![]);

    let preview = Arc::new(adapter.preview_adapter(
        result("weather://slow", "slow").into_shared(),
        ActionMetadata::default(),
    ));
    let running = RunningPreview::spawn(preview.clone() as Arc<dyn PreviewQueryBase>);

    let deadline = Instant::now() + Duration::from_secs(5);
    while running.reply().widgets().is_empty() {
        assert!(Instant::now() < deadline, "preview never pushed its header");
        std::thread::sleep(Duration::from_millis(5));
    }
    running.cancel();
    let reply = running.join().unwrap();

    assert_eq!(preview.state(), AdapterState::Cancelled);
    assert_eq!(reply.widgets().len(), 1);
    assert_eq!(reply.finished_count(), 1);
}

#[test]
fn test_lua_widget_action_returns_query() {
    let root = fixture();
    let scope = weather(root.path());
    let adapter = started(&scope, vec![]);

    let response = adapter
        .perform_action(
            result("weather://london", "london").into_shared(),
            ActionMetadata::default(),
            "actions",
            "forecast",
        )
        .activate()
        .unwrap();

    assert_eq!(response.status(), ActivationStatus::PerformQuery);
    let query = response.query().unwrap();
    assert_eq!(query.query_string(), "london");
    assert_eq!(query.department_id(), "week");
    assert_eq!(response.scope_data(), &Value::from("actions/forecast"));
}

/// Collects the target of every event.
struct Targets(Arc<Mutex<BTreeSet<String>>>);

impl<S: tracing::Subscriber> Layer<S> for Targets {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.0.lock().unwrap().insert(event.metadata().target().to_string());
    }
}

#[test]
fn test_logs_use_known_targets() {
    const CHATTY_SCRIPT: &str = r#"
local scope = {}
function scope.search(query, metadata, reply, cancel)
    scopes.log_info("searching " .. query.query_string)
end
function scope.preview(result, metadata, reply, cancel) end
return scope
"#;

    let root = TempDir::new().unwrap();
    write_scope(root.path(), "chatty", "name = \"chatty\"", CHATTY_SCRIPT);
    write_scope(root.path(), "broken", "name = ", MINIMAL_SCRIPT);

    let targets = Arc::new(Mutex::new(BTreeSet::new()));
    let subscriber = tracing_subscriber::registry().with(Targets(targets.clone()));
    tracing::subscriber::with_default(subscriber, || {
        let scopes = loader(root.path()).discover_scopes().unwrap();
        assert_eq!(scopes.len(), 1);
        let adapter = started(&scopes[0], Vec::new());
        let search = adapter.search_adapter(CannedQuery::new("chatty", "rain", ""), SearchMetadata::default());
        search.run(Arc::new(RecordingSearchReply::new()));
        adapter.stop();
    });

    let targets = targets.lock().unwrap().clone();
    assert!(targets.contains("scope"));
    assert!(targets.contains("scope_script"));
    for target in &targets {
        assert!(
            ["scope", "scope_script", "bridge"].contains(&target.as_str()),
            "unexpected log target {target}"
        );
    }
}
