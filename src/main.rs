//! scopebridge - run scripted scopes against an in-process host.
//!
//! Usage:
//!   scopebridge list                      List installed scopes
//!   scopebridge search SCOPE [QUERY]      Run a search and print the reply stream
//!   scopebridge preview SCOPE --uri URI   Preview a result
//!   scopebridge activate SCOPE --uri URI  Activate a result or a preview action
//!   scopebridge --help                    Show help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail};

use scopebridge_core::{ActionMetadata, CannedQuery, ScopeResult, SearchMetadata, Value, codec};
use scopebridge_host::memory::{self, MemoryHost};
use scopebridge_host::{HostCapabilities, HostVersion, ScopeAdapter, ScopeEntry};
use scopebridge_plugin::{LoadedScope, ScopeConfig, ScopeLoader, default_loader};

#[derive(Parser)]
#[command(
    name = "scopebridge",
    version,
    about = "Run scripted scopes against an in-process scope host",
    long_about = "scopebridge loads scopes from a scope directory and drives them \
                  the way a scope host would, printing every reply event as JSON."
)]
struct Cli {
    /// Directory containing scope directories (defaults to the user config dir)
    #[arg(short = 'd', long, global = true)]
    scope_dir: Option<PathBuf>,

    /// Host version to emulate
    #[arg(long, global = true, default_value_t = HostVersion::MINIMUM)]
    host_version: HostVersion,

    /// Scopes to skip while loading
    #[arg(long = "disable", global = true)]
    disabled: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List installed scopes
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a search
    Search {
        /// Scope id
        scope: String,

        /// Query string
        #[arg(default_value = "")]
        query: String,

        /// Department to search in
        #[arg(long, default_value = "")]
        department: String,

        /// Maximum number of results the host wants (0 = no limit)
        #[arg(short = 'n', long, default_value = "0")]
        cardinality: usize,

        #[arg(long)]
        locale: Option<String>,

        #[arg(long)]
        form_factor: Option<String>,
    },

    /// Preview a result
    Preview {
        /// Scope id
        scope: String,

        #[command(flatten)]
        result: ResultArgs,
    },

    /// Activate a result, or perform a preview widget action
    Activate {
        /// Scope id
        scope: String,

        #[command(flatten)]
        result: ResultArgs,

        /// Widget that triggered the action
        #[arg(long, requires = "action")]
        widget: Option<String>,

        /// Action id within the widget
        #[arg(long, requires = "widget")]
        action: Option<String>,
    },
}

#[derive(clap::Args)]
struct ResultArgs {
    /// Result URI
    #[arg(long)]
    uri: String,

    /// Result title
    #[arg(long, default_value = "")]
    title: String,

    /// Extra attributes as key=value; values are parsed as JSON when possible
    #[arg(long = "attr", value_parser = parse_attr)]
    attrs: Vec<(String, Value)>,
}

impl ResultArgs {
    fn to_result(&self) -> ScopeResult {
        let mut result = ScopeResult::new();
        result.set_uri(self.uri.as_str());
        result.set_title(self.title.as_str());
        for (key, value) in &self.attrs {
            result.set(key.as_str(), value.clone());
        }
        result
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn parse_attr(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    let value = codec::decode(value.as_bytes()).unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();

    let mut config = ScopeConfig::default();
    if let Some(dir) = &cli.scope_dir {
        config = config.with_scope_dir(dir);
    }
    for name in &cli.disabled {
        config = config.disable_scope(name);
    }
    let loader = default_loader(config)
        .wrap_err("Failed to initialize scope runtimes")?
        .with_host_version(cli.host_version);
    let scopes = loader.discover_scopes().wrap_err("Failed to discover scopes")?;
    tracing::debug!(target: "scope", "discovered {} scopes", scopes.len());

    match cli.command {
        Command::List { format } => run_list(&scopes, format)?,
        Command::Search {
            scope,
            query,
            department,
            cardinality,
            locale,
            form_factor,
        } => {
            let adapter = start(&loader, &scopes, &scope, cli.host_version)?;
            let query = CannedQuery::new(scope.as_str(), query, department);
            let metadata = SearchMetadata::new(cardinality, locale, form_factor);
            let reply = memory::run_search(adapter.search(query, metadata))?;
            adapter.stop();
            print_events(&reply.events())?;
        }
        Command::Preview { scope, result } => {
            let adapter = start(&loader, &scopes, &scope, cli.host_version)?;
            let reply = memory::run_preview(
                adapter.preview(result.to_result().into_shared(), ActionMetadata::default()),
            )?;
            adapter.stop();
            print_events(&reply.events())?;
        }
        Command::Activate {
            scope,
            result,
            widget,
            action,
        } => {
            let adapter = start(&loader, &scopes, &scope, cli.host_version)?;
            let target = result.to_result().into_shared();
            let query = match (widget, action) {
                (Some(widget), Some(action)) => {
                    adapter.perform_action(target, ActionMetadata::default(), &widget, &action)
                }
                _ => adapter.activate(target, ActionMetadata::default()),
            };
            let response = query.activate();
            adapter.stop();
            let response = response.wrap_err("Activation failed")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::Value::from(&response.to_value()))?
            );
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .init();
}

/// Start `id` on a memory host listing every discovered scope in its registry.
fn start(
    loader: &ScopeLoader,
    scopes: &[LoadedScope],
    id: &str,
    version: HostVersion,
) -> Result<ScopeAdapter> {
    let Some(scope) = scopes.iter().find(|s| s.id() == id) else {
        bail!(
            "No scope named '{}' in {}",
            id,
            loader.config().scope_dir.display()
        );
    };

    let registry = scopes
        .iter()
        .map(LoadedScope::metadata)
        .collect::<Result<Vec<_>, _>>()?;

    let host = MemoryHost::new()
        .with_capabilities(HostCapabilities::new(version))
        .with_scope_directory(&scope.path)
        .with_cache_directory(&scope.cache_dir)
        .with_tmp_directory(&scope.tmp_dir)
        .with_settings(scope.manifest.settings_value())
        .with_registry(registry);

    let adapter = scope.adapter();
    adapter
        .start(id, Arc::new(host))
        .wrap_err_with(|| format!("Failed to start scope '{id}'"))?;
    Ok(adapter)
}

fn run_list(scopes: &[LoadedScope], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if scopes.is_empty() {
                println!("No scopes installed.");
            }
            for scope in scopes {
                let manifest = &scope.manifest;
                println!(
                    "{:<20} {:<10} {:<6} {}",
                    manifest.name, manifest.version, manifest.runtime, manifest.description
                );
            }
        }
        OutputFormat::Json => {
            let entries = scopes
                .iter()
                .map(|scope| scope.metadata().map(|m| serde_json::Value::from(&m.to_value())))
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}

fn print_events(events: &[Value]) -> Result<()> {
    let events: Vec<serde_json::Value> = events.iter().map(serde_json::Value::from).collect();
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
