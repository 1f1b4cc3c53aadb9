//! server-monitor - endpoint monitoring daemon.
//!
//! Probes a configured set of HTTP, TCP, and TLS endpoints, persists every
//! result, alerts on state transitions, and exposes Prometheus metrics.

mod alert;
mod config;
mod db;
mod metrics;
mod notify;
mod probe;
mod scheduler;
mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::MonitorConfig;
use metrics::Metrics;
use scheduler::{Engine, MonitoredEndpoint};

#[derive(Parser)]
#[command(name = "server-monitor", version, about = "A monitoring daemon for servers and endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the monitoring daemon
    Start {
        /// Path to the YAML configuration file
        config: PathBuf,
        /// Port for the /metrics and /health endpoints
        #[arg(long, default_value_t = 8080)]
        health_port: u16,
    },
    /// Validate a configuration file and exit
    Validate {
        /// Path to the YAML configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config } => {
            let cfg = MonitorConfig::from_yaml(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            let enabled = cfg.endpoints.iter().filter(|e| e.enabled).count();
            println!(
                "configuration OK: {} endpoints ({} enabled)",
                cfg.endpoints.len(),
                enabled
            );
            Ok(())
        }
        Command::Start { config, health_port } => run(&config, health_port).await,
    }
}

async fn run(config_path: &PathBuf, health_port: u16) -> anyhow::Result<()> {
    let cfg = MonitorConfig::from_yaml(config_path)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;

    init_logging(&cfg.global).context("failed to initialize logging")?;
    tracing::info!(config = %config_path.display(), "starting server-monitor");

    for channel in cfg.plain_smtp_channels() {
        tracing::warn!(channel = %channel, "SMTP configured without TLS; credentials travel in cleartext");
    }

    let metrics = Arc::new(Metrics::new());
    let store = db::open_store(&cfg.global.database, cfg.global.max_concurrent_checks)
        .await
        .context("failed to open result store")?;
    tracing::info!("result store initialized");

    let endpoints = build_endpoints(&cfg)?;
    if endpoints.is_empty() {
        tracing::warn!("no enabled endpoints to monitor");
    }

    let mut engine = Engine::new(
        endpoints,
        store,
        metrics.clone(),
        cfg.global.max_concurrent_checks,
    );
    engine.start().context("failed to start engine")?;

    let cancel = engine.cancel_token();
    let server = web::Server::new(health_port, metrics);
    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.start(server_cancel).await {
            tracing::error!(error = %e, "metrics server failed");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining monitors");

    engine.shutdown().await;
    let _ = server_task.await;

    tracing::info!("server-monitor stopped");
    Ok(())
}

/// Resolve every enabled endpoint into its runtime form: compiled probe spec
/// plus effective notification channels.
fn build_endpoints(cfg: &MonitorConfig) -> anyhow::Result<Vec<MonitoredEndpoint>> {
    let mut endpoints = Vec::new();
    for endpoint in cfg.endpoints.iter().filter(|e| e.enabled) {
        let spec = probe::CheckSpec::from_config(endpoint)
            .with_context(|| format!("endpoint '{}'", endpoint.name))?;
        let email = cfg.resolve_email(endpoint)?;
        let webhook = cfg.resolve_webhook(endpoint)?;
        endpoints.push(MonitoredEndpoint {
            name: endpoint.name.clone(),
            interval: Duration::from_secs(endpoint.interval),
            spec,
            email,
            webhook,
        });
    }
    Ok(endpoints)
}

fn init_logging(global: &config::GlobalConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(global.log_level.to_lowercase()));

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter);

    if let Some(path) = &global.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {path}"))?;
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            .init();
    } else {
        registry.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
