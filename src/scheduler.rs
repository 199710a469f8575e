// In-process schedule for `serve`: run once per interval or per cron fire, until shutdown.
// Runs never overlap; a tick that arrives while a run is in progress waits for it,
// further ticks are dropped.

use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::config::{AppConfig, RunConfig};
use crate::delivery::SampleSink;
use crate::flow_store::FlowStore;
use crate::pipeline;

/// Runs the pipeline on schedule until `shutdown_rx` fires or its sender is dropped.
#[instrument(skip_all, fields(interval_secs = config.run.interval_secs, schedule = ?config.run.schedule))]
pub async fn serve<S, K>(
    config: &AppConfig,
    store: &S,
    sink: &K,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    S: FlowStore,
    K: SampleSink,
{
    let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
    let ticker = tokio::spawn(ticker(config.run.clone(), tick_tx));

    loop {
        tokio::select! {
            tick = tick_rx.recv() => {
                if tick.is_none() {
                    warn!("scheduler stopped producing ticks");
                    break;
                }
                match pipeline::run_once(config, store, sink, Utc::now()).await {
                    Ok(report) if !report.is_complete() => {
                        warn!(
                            policies_failed = report.failed_policies.len(),
                            rows_skipped = report.skipped_rows.len(),
                            "run finished incomplete"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "run failed"),
                }
            }
            _ = &mut shutdown_rx => {
                info!("scheduler shutting down");
                break;
            }
        }
    }
    ticker.abort();
}

/// Sends a tick at each fire time (cron, local time) or every `interval_secs`.
async fn ticker(config: RunConfig, tx: mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid run.schedule; no runs will be scheduled");
            return;
        };
        loop {
            let now = chrono::Local::now();
            if let Some(next) = schedule.after(&now).next() {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.try_send(()).is_err() && tx.is_closed() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.try_send(()).is_err() && tx.is_closed() {
                break;
            }
        }
    }
}
