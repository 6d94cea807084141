// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cam_cli::commands::{self, LocalRuntime};
use cam_cli::config::{self, CliConfig};
use cam_cli::format::{Formatter, OutputFormat};
use cam_core::{RunOptions, RunStrategy};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Exit code for fatal initialization errors (bad config, unreachable daemon at startup).
const EXIT_INIT_ERROR: i32 = 1;
/// Exit code for unhandled errors during command execution.
const EXIT_RUNTIME_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "cam", version, about = "Capability-driven mainframe ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of a running cam-daemon (overrides config and the default).
    #[arg(long, global = true)]
    daemon_url: Option<String>,

    /// Path to a cam-cli.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Kind Registry inspection.
    Registry {
        #[command(subcommand)]
        action: RegistryCommands,
    },
    /// Artifact Store inspection.
    Store {
        #[command(subcommand)]
        action: StoreCommands,
    },
    /// Run lifecycle: start, watch, cancel.
    Run {
        #[command(subcommand)]
        action: RunCommands,
    },
    /// Launch the HTTP daemon (or a stdio adapter) in-process.
    Daemon {
        /// Bind host for the HTTP listener.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Bind port for the HTTP listener.
        #[arg(long, default_value_t = 8088)]
        port: u16,

        /// Serve a newline-delimited JSON-RPC loop over stdin/stdout instead
        /// of binding an HTTP listener (for MCP child-process launches).
        #[arg(long)]
        stdio: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommands {
    /// List every registered kind.
    Kinds,
    /// Validate a document against a kind's schema.
    Validate {
        /// Kind id, e.g. `cam.cobol.copybook`.
        #[arg(long)]
        kind: String,
        /// Path to a JSON file holding the document to validate.
        #[arg(long)]
        data_file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum StoreCommands {
    /// Fetch a single artifact.
    Get {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        artifact: String,
    },
    /// Fetch the delta buckets produced by a run.
    Deltas {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        run_id: String,
        /// Include artifact ids in each bucket, not just counts.
        #[arg(long)]
        include_ids: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RunCommands {
    /// Start a playbook run in-process, without a daemon.
    Start {
        #[arg(long)]
        workspace: String,
        /// Path to a JSON file holding the kinds this run's pack depends on.
        #[arg(long)]
        kinds_file: PathBuf,
        /// Path to a JSON file holding the `CapabilityPack` to run.
        #[arg(long)]
        pack_file: PathBuf,
        #[arg(long)]
        playbook: String,
        /// Path to a JSON file holding the run's inputs. Defaults to `{}`.
        #[arg(long)]
        inputs_file: Option<PathBuf>,
        /// `baseline` upserts produced artifacts; `delta` only computes diffs.
        #[arg(long, default_value = "baseline")]
        strategy: String,
        /// Continue past a step failure instead of aborting the run.
        #[arg(long)]
        allow_partial_step_failures: bool,
        /// Write the final `Run` record as JSON to this path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Stream live events for a run from a daemon.
    Watch {
        #[arg(long)]
        run_id: String,
    },
    /// Request cancellation of a running run on a daemon.
    Cancel {
        #[arg(long)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", Formatter::new(OutputFormat::Text).format_error(&format!("{err:#}")));
            EXIT_RUNTIME_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref()).context("load configuration")?;
    if let Err(errs) = config::validate_config(&config) {
        for e in &errs {
            eprintln!("{}", Formatter::new(OutputFormat::Text).format_error(&e.to_string()));
        }
        std::process::exit(EXIT_INIT_ERROR);
    }

    let formatter = Formatter::new(cli.format.clone());
    let daemon_url = config::resolve_daemon_url(cli.daemon_url.clone(), &config);

    match cli.command {
        Commands::Registry { action } => run_registry(action, &daemon_url, &formatter).await,
        Commands::Store { action } => run_store(action, &daemon_url, &formatter).await,
        Commands::Run { action } => run_run(action, &daemon_url, &formatter, &config).await,
        Commands::Daemon { host, port, stdio } => run_daemon(host, port, stdio, cli.config.as_deref()).await,
    }
}

async fn run_registry(action: RegistryCommands, daemon_url: &str, formatter: &Formatter) -> Result<()> {
    let client = reqwest::Client::new();
    match action {
        RegistryCommands::Kinds => {
            let kinds = commands::registry_kinds(&client, daemon_url).await?;
            println!("{}", formatter.format_kinds(&kinds));
        }
        RegistryCommands::Validate { kind, data_file } => {
            let data = commands::load_inputs(Some(&data_file))?;
            let result = commands::registry_validate(&client, daemon_url, &kind, data).await?;
            println!("{}", formatter.format_value(&result));
        }
    }
    Ok(())
}

async fn run_store(action: StoreCommands, daemon_url: &str, formatter: &Formatter) -> Result<()> {
    let client = reqwest::Client::new();
    match action {
        StoreCommands::Get { workspace, artifact } => {
            let result = commands::store_get_artifact(&client, daemon_url, &workspace, &artifact).await?;
            println!("{}", formatter.format_value(&result));
        }
        StoreCommands::Deltas { workspace, run_id, include_ids } => {
            let result = commands::store_deltas(&client, daemon_url, &workspace, &run_id, include_ids).await?;
            println!("{}", formatter.format_value(&result));
        }
    }
    Ok(())
}

async fn run_run(action: RunCommands, daemon_url: &str, formatter: &Formatter, config: &CliConfig) -> Result<()> {
    match action {
        RunCommands::Start {
            workspace,
            kinds_file,
            pack_file,
            playbook,
            inputs_file,
            strategy,
            allow_partial_step_failures,
            out,
        } => {
            let kinds_path = config::resolve_definitions_path(&kinds_file.to_string_lossy(), config);
            let pack_path = config::resolve_definitions_path(&pack_file.to_string_lossy(), config);
            let kinds = commands::load_kinds_file(&kinds_path)?;
            let pack = commands::load_pack_file(&pack_path)?;
            let inputs = commands::load_inputs(inputs_file.as_deref())?;
            let strategy = parse_strategy(&strategy)?;
            let options = RunOptions { allow_partial_step_failures, ..RunOptions::default() };
            let pack_key = pack.key.clone();

            let runtime = LocalRuntime::bootstrap(kinds, pack, &workspace).await?;
            let mut handle = runtime.start_run(workspace, pack_key, playbook, inputs, strategy, options).await?;

            while let Some(event) = tokio_stream::StreamExt::next(&mut handle.events).await {
                println!("{}", formatter.format_run_event(&event));
            }
            let final_run = handle.join().await.map_err(|e| anyhow::anyhow!(e))?;

            if let Some(out_path) = out {
                let json = serde_json::to_string_pretty(&final_run).context("serializing run record")?;
                std::fs::write(&out_path, json).with_context(|| format!("writing {}", out_path.display()))?;
            }
            println!("{}", formatter.format_value(&serde_json::to_value(&final_run)?));
        }
        RunCommands::Watch { run_id } => {
            commands::run_watch(daemon_url, &run_id, |event| {
                println!("{}", formatter.format_run_event(&event));
            })
            .await?;
        }
        RunCommands::Cancel { run_id } => {
            let client = reqwest::Client::new();
            commands::run_cancel(&client, daemon_url, &run_id).await?;
            println!("{}", formatter.format_value(&serde_json::json!({"run_id": run_id, "cancelled": true})));
        }
    }
    Ok(())
}

fn parse_strategy(raw: &str) -> Result<RunStrategy> {
    match raw.to_ascii_lowercase().as_str() {
        "baseline" => Ok(RunStrategy::Baseline),
        "delta" => Ok(RunStrategy::Delta),
        other => anyhow::bail!("unknown run strategy '{other}', expected 'baseline' or 'delta'"),
    }
}

async fn run_daemon(host: String, port: u16, stdio: bool, config_path: Option<&Path>) -> Result<()> {
    use std::sync::Arc;

    use cam_daemon::{AppState, build_app};
    use cam_events::EventPublisher;
    use cam_registry::KindRegistry;
    use cam_runtime::{Orchestrator, PackCatalog, RunStore};
    use cam_store::ArtifactStore;
    use chrono::Utc;

    let core_config = cam_config::load_config(config_path).context("load daemon configuration")?;

    let kinds = Arc::new(KindRegistry::new());
    let store = Arc::new(ArtifactStore::new());
    let packs = Arc::new(PackCatalog::new());
    let runs = Arc::new(RunStore::new());
    let mut orchestrator = Orchestrator::new(Arc::clone(&packs), Arc::clone(&kinds), Arc::clone(&store), runs);

    if let Some(broker_url) = &core_config.broker_url {
        orchestrator = orchestrator.with_publisher(EventPublisher::new(broker_url.clone()));
    } else {
        tracing::warn!("no broker_url configured, run/artifact lifecycle events will not be published");
    }

    let state = Arc::new(AppState { kinds, store, packs, orchestrator: Arc::new(orchestrator), started_at: Utc::now() });

    if stdio {
        stdio_loop(state).await
    } else {
        let app = build_app(state);
        let bind = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
        tracing::info!(%bind, "cam daemon listening");
        axum::serve(listener, app).await.context("serve")
    }
}

/// Minimal newline-delimited JSON-RPC loop over stdin/stdout, for MCP child
/// processes that prefer a pipe to an HTTP socket. Supports a handful of
/// read-only registry/store methods; mutation still goes through the HTTP
/// surface.
async fn stdio_loop(state: std::sync::Arc<cam_daemon::AppState>) -> Result<()> {
    use std::io::Write;

    use tokio::io::{AsyncBufReadExt, BufReader};

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await.context("reading stdio request")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                emit_stdio(&serde_json::json!({"error": format!("invalid request: {e}")}))?;
                continue;
            }
        };
        let response = handle_stdio_request(&state, &request).await;
        emit_stdio(&response)?;
        std::io::stdout().flush().ok();
    }
    Ok(())
}

fn emit_stdio(value: &serde_json::Value) -> Result<()> {
    println!("{value}");
    Ok(())
}

async fn handle_stdio_request(state: &cam_daemon::AppState, request: &serde_json::Value) -> serde_json::Value {
    let method = request.get("method").and_then(|m| m.as_str()).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(serde_json::Value::Null);
    match method {
        "kinds.list" => {
            let kinds = state.kinds.active_kinds().await;
            serde_json::json!({"result": kinds})
        }
        "kinds.validate" => {
            let kind = params.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
            let data = params.get("data").cloned().unwrap_or(serde_json::Value::Null);
            match state.kinds.validate_data(kind, &data, None).await {
                Ok(()) => serde_json::json!({"result": {"valid": true}}),
                Err(e) => serde_json::json!({"result": {"valid": false, "error": e.to_string()}}),
            }
        }
        "store.get" => {
            let workspace = params.get("workspace").and_then(|w| w.as_str()).unwrap_or_default();
            let artifact_id = params.get("artifact_id").and_then(|a| a.as_str()).unwrap_or_default();
            match state.store.get_artifact(workspace, artifact_id).await {
                Ok(artifact) => serde_json::json!({"result": artifact}),
                Err(e) => serde_json::json!({"error": e.to_string()}),
            }
        }
        "store.deltas" => {
            let workspace = params.get("workspace").and_then(|w| w.as_str()).unwrap_or_default();
            let run_id = params.get("run_id").and_then(|r| r.as_str()).unwrap_or_default();
            let include_ids = params.get("include_ids").and_then(|v| v.as_bool()).unwrap_or(false);
            match state.store.compute_run_deltas(workspace, run_id, include_ids).await {
                Ok(deltas) => serde_json::json!({"result": deltas}),
                Err(e) => serde_json::json!({"error": e.to_string()}),
            }
        }
        other => serde_json::json!({"error": format!("unknown method '{other}'")}),
    }
}

fn init_tracing(debug: bool) {
    let directive = if debug { "cam=debug" } else { "cam=info" };
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("cam=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
