#![deny(unsafe_code)]
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cam_config::{CoreConfig, LogFormat, load_config};
use cam_daemon::{AppState, build_app};
use cam_events::EventPublisher;
use cam_registry::KindRegistry;
use cam_runtime::{Orchestrator, PackCatalog, RunStore};
use cam_store::ArtifactStore;
use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cam-daemon", version, about = "Capability-driven ingestion platform daemon")]
struct Args {
    /// Path to a TOML config file, layered over defaults and `CAM_*` env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overriding the resolved config's `http_bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose (debug-level) logging, overriding the resolved config's `log_level`.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("load configuration")?;

    init_tracing(&config, args.debug);

    let bind = args.bind.clone().unwrap_or_else(|| config.http_bind.clone());

    let kinds = Arc::new(KindRegistry::new());
    let store = Arc::new(ArtifactStore::new());
    let packs = Arc::new(PackCatalog::new());
    let runs = Arc::new(RunStore::new());

    let mut orchestrator = Orchestrator::new(Arc::clone(&packs), Arc::clone(&kinds), Arc::clone(&store), runs);

    if let Some(broker_url) = &config.broker_url {
        orchestrator = orchestrator.with_publisher(EventPublisher::new(broker_url.clone()));
    } else {
        warn!("no broker_url configured, run/artifact lifecycle events will not be published");
    }

    let state = Arc::new(AppState {
        kinds,
        store,
        packs,
        orchestrator: Arc::new(orchestrator),
        started_at: Utc::now(),
    });

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("bind {bind}"))?;
    info!(%bind, "cam-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

fn init_tracing(config: &CoreConfig, debug: bool) {
    let directive = if debug { "cam=debug".to_string() } else { format!("cam={}", config.log_level) };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("cam=info"));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
