use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use flowtalk::config::AppConfig;
use flowtalk::delivery::{DeliveryChannel, StdoutSink};
use flowtalk::flow_store::FlowStoreClient;
use flowtalk::pipeline::{self, RunReport};
use flowtalk::{port_registry, scheduler, version};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Top-talker flow metrics exporter.
#[derive(Parser)]
#[command(name = "flowtalk", version, about)]
struct Cli {
    /// Config file (default: $CONFIG_FILE or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate the trailing window once and send the samples to the sink.
    Run {
        /// Replay the window ending at this RFC 3339 instant instead of the store clock.
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Like `run`, but print the line-protocol samples to stdout.
    Print {
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Run on the configured interval or cron schedule until interrupted.
    Serve,

    /// Reload the port-name table from the service-name registry.
    RefreshPorts {
        /// Read the registry CSV from a local file instead of `registry.url`.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app_config = match cli.config {
        Some(ref path) => AppConfig::load_from_path(&path.to_string_lossy())?,
        None => AppConfig::load()?,
    };
    tracing::info!(
        version = version::VERSION,
        policies = app_config.policies.len(),
        window_secs = app_config.run.window_secs,
        "{} starting",
        version::NAME
    );

    let store = FlowStoreClient::connect(&app_config.flow_store)
        .await
        .context("flow store unreachable")?;

    match cli.command {
        Commands::Run { as_of } => {
            let sink = DeliveryChannel::from_config(&app_config.sink);
            let report = match as_of {
                Some(t) => pipeline::replay(&app_config, &store, &sink, t).await?,
                None => pipeline::run_once(&app_config, &store, &sink, Utc::now()).await?,
            };
            ensure_complete(&report)?;
        }
        Commands::Print { as_of } => {
            let report = match as_of {
                Some(t) => pipeline::replay(&app_config, &store, &StdoutSink, t).await?,
                None => pipeline::run_once(&app_config, &store, &StdoutSink, Utc::now()).await?,
            };
            ensure_complete(&report)?;
        }
        Commands::Serve => {
            let sink = DeliveryChannel::from_config(&app_config.sink);
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            let serve = scheduler::serve(&app_config, &store, &sink, shutdown_rx);
            tokio::pin!(serve);
            tokio::select! {
                _ = &mut serve => {}
                _ = shutdown_signal() => {
                    tracing::info!("Received shutdown signal");
                    // lets an in-flight run finish
                    let _ = shutdown_tx.send(());
                    serve.await;
                }
            }
        }
        Commands::RefreshPorts { file } => {
            let inserted = match file {
                Some(path) => {
                    let f = std::fs::File::open(&path)
                        .with_context(|| format!("open {}", path.display()))?;
                    port_registry::refresh_from_reader(&store, f).await?
                }
                None => port_registry::refresh(&store, &app_config.registry).await?,
            };
            tracing::info!(ports = inserted, "refresh complete");
        }
    }

    Ok(())
}

/// Non-zero exit when a policy failed or a row was skipped, after logging the details.
fn ensure_complete(report: &RunReport) -> Result<()> {
    for e in &report.failed_policies {
        tracing::error!(policy = e.policy(), error = %e, "policy failed");
    }
    for e in &report.skipped_rows {
        tracing::error!(error = %e, "row skipped");
    }
    anyhow::ensure!(
        report.is_complete(),
        "run {} incomplete: {} policies failed, {} rows skipped",
        report.run_timestamp,
        report.failed_policies.len(),
        report.skipped_rows.len()
    );
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
