//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "binary"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Binary entrypoint for the IED proxy daemon."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ied_common::config::AppConfig;
use ied_common::logging::init_tracing;
use ied_core::{ControlDispatcher, ControlWorker, IedRuntime, ReportBridge};
use ied_metrics::{new_registry, spawn_http_server, BridgeMetrics, DaemonMetrics};
use ied_model::{LoopbackStack, ModelBuilder, ModelSchema};
use ied_net::{GrpcBackend, GrpcServerBuilder};
use ied_persistence::{JsonFileStore, SchemaStore};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["config/iedproxy.toml", "/etc/iedproxy/iedproxy.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("iedproxyd ", env!("CARGO_PKG_VERSION")),
    about = "IEC 61850 proxy daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Override the model schema path")]
    schema: Option<PathBuf>,

    #[arg(long, help = "Override the IEC 61850 listen port")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the model and the RPC surface")]
    Run,
    #[command(about = "Build the schema without serving it and report what it contains")]
    Validate,
    #[command(about = "Print every canonical attribute path")]
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let (mut config, source) = load_config(cli.config.as_ref())?;
    let load_duration = load_started.elapsed();
    if let Some(schema) = cli.schema {
        config.model.schema_path = schema;
    }
    if let Some(port) = cli.port {
        config.iec61850.port = port;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("iedproxyd", &config.logging)?;
            match &source {
                Some(path) => info!(config_path = %path.display(), "configuration loaded"),
                None => info!("no configuration file found; using defaults"),
            }
            run_daemon(config, load_duration.as_secs_f64()).await?
        }
        Commands::Validate => validate_schema(&config)?,
        Commands::Paths => print_paths(&config)?,
    }

    Ok(())
}

/// An explicit `--config` must exist; the default candidates are optional.
fn load_config(explicit: Option<&PathBuf>) -> Result<(AppConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let loaded = AppConfig::load_with_source(&[path])?;
        return Ok((loaded.config, Some(loaded.source)));
    }
    let env_set = std::env::var(AppConfig::ENV_CONFIG_PATH).is_ok_and(|value| !value.trim().is_empty());
    let any_candidate = DEFAULT_CONFIG_CANDIDATES
        .iter()
        .any(|candidate| std::path::Path::new(candidate).exists());
    if env_set || any_candidate {
        let loaded = AppConfig::load_with_source(DEFAULT_CONFIG_CANDIDATES)?;
        return Ok((loaded.config, Some(loaded.source)));
    }
    Ok((AppConfig::default(), None))
}

fn load_schema(config: &AppConfig) -> Result<ModelSchema> {
    JsonFileStore::new(&config.model.schema_path)
        .load()
        .with_context(|| {
            format!(
                "failed to load schema {}",
                config.model.schema_path.display()
            )
        })
}

fn validate_schema(config: &AppConfig) -> Result<()> {
    let schema = load_schema(config)?;
    let stack = LoopbackStack::new();
    let model = ModelBuilder::new(&stack)
        .build(&schema)
        .context("schema does not build")?;
    println!(
        "{}: {} logical devices, {} attribute paths, {} controllable objects, {} report control blocks",
        schema.name,
        schema.logical_devices.len(),
        model.index().len(),
        model.index().controllable_objects().count(),
        model.reports().len()
    );
    Ok(())
}

fn print_paths(config: &AppConfig) -> Result<()> {
    let schema = load_schema(config)?;
    let stack = LoopbackStack::new();
    let model = ModelBuilder::new(&stack)
        .build(&schema)
        .context("schema does not build")?;
    for (path, entry) in model.index().attributes() {
        println!("{path}\t{}\t{}", entry.data_type, entry.fc);
    }
    for (path, object) in model.index().controllable_objects() {
        println!("{path}\tcontrollable\t{}", object.cdc);
    }
    Ok(())
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" },
    );
    let bridge_metrics = BridgeMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let backend = GrpcBackend::connect_lazy(&config.rpc.backend)?;
    let (dispatcher, queue) = ControlDispatcher::channel(config.control.queue_capacity);
    let worker = ControlWorker::spawn(
        queue,
        Arc::new(backend),
        config.control.backend_timeout,
        Some(bridge_metrics.clone()),
    );
    let reports = ReportBridge::new(256, Some(bridge_metrics.clone()));
    let observer = spawn_observer(&reports, &worker);

    let runtime = Arc::new(
        IedRuntime::new(
            Arc::new(LoopbackStack::new()),
            Arc::new(JsonFileStore::new(&config.model.schema_path)),
            config.iec61850.port,
            dispatcher,
            reports,
        )?
        .with_metrics(bridge_metrics),
    );
    let starting = runtime.clone();
    tokio::task::spawn_blocking(move || starting.start())
        .await
        .context("startup task failed")??;

    let grpc = GrpcServerBuilder::new(config.rpc.listen, runtime.clone(), config.rpc.workers)
        .spawn()
        .await?;

    info!(
        iec_port = config.iec61850.port,
        rpc = %grpc.local_addr(),
        backend = %config.rpc.backend,
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    grpc.shutdown().await?;
    let stopping = runtime.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("shutdown task failed")?;
    worker.shutdown().await;
    observer.abort();

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Log decoded reports and control outcomes.
fn spawn_observer(reports: &ReportBridge, worker: &ControlWorker) -> tokio::task::JoinHandle<()> {
    let mut reports = reports.subscribe();
    let mut outcomes = worker.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                report = reports.recv() => match report {
                    Ok(report) => match serde_json::to_string(&report) {
                        Ok(body) => info!(rcb = %report.rcb_reference, report = %body, "report received"),
                        Err(err) => warn!(error = %err, "report not serialisable"),
                    },
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "report observer lagged"),
                    Err(RecvError::Closed) => break,
                },
                outcome = outcomes.recv() => match outcome {
                    Ok(outcome) => info!(path = %outcome.path, status = ?outcome.status, "control outcome"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "control observer lagged"),
                    Err(RecvError::Closed) => {
                        info!("control worker stopped");
                        break;
                    }
                },
            }
        }
    })
}
