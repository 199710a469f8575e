// One export run: aggregate -> encode -> deliver.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::aggregator::Aggregator;
use crate::config::AppConfig;
use crate::delivery::SampleSink;
use crate::error::{EncodingError, QueryError, RunError};
use crate::flow_store::FlowStore;
use crate::models::TimeWindow;

/// Outcome of a run that reached the delivery step.
#[derive(Debug)]
pub struct RunReport {
    pub run_timestamp: i64,
    pub samples_sent: usize,
    pub policies_ok: usize,
    pub failed_policies: Vec<QueryError>,
    pub skipped_rows: Vec<EncodingError>,
}

impl RunReport {
    /// True when every policy was queried and every row was sent.
    pub fn is_complete(&self) -> bool {
        self.failed_policies.is_empty() && self.skipped_rows.is_empty()
    }
}

/// Runs once over the trailing window ending at the store's clock.
/// `now` provides the run timestamp shared by every sample.
pub async fn run_once<S, K>(
    config: &AppConfig,
    store: &S,
    sink: &K,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    S: FlowStore,
    K: SampleSink,
{
    run_with(Aggregator::from_config(config), store, sink, now).await
}

/// Runs once over the window ending at `as_of`, stamping samples with `as_of`.
pub async fn replay<S, K>(
    config: &AppConfig,
    store: &S,
    sink: &K,
    as_of: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    S: FlowStore,
    K: SampleSink,
{
    let window = TimeWindow::ending_at(config.window().duration, as_of);
    run_with(
        Aggregator::from_config(config).with_window(window),
        store,
        sink,
        as_of,
    )
    .await
}

#[instrument(skip_all, fields(run_timestamp = now.timestamp()))]
async fn run_with<S, K>(
    aggregator: Aggregator<'_>,
    store: &S,
    sink: &K,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    S: FlowStore,
    K: SampleSink,
{
    let aggregation = aggregator.collect(store, now).await?;
    let (samples, skipped_rows) = aggregation.encode();
    let policies_ok = aggregation.results.len();

    let samples_sent = if samples.is_empty() {
        warn!("no samples produced; sink not contacted");
        0
    } else {
        sink.deliver(&samples).await.inspect_err(|e| {
            warn!(error = %e, written = e.written(), total = samples.len(), "delivery failed");
        })?
    };

    let report = RunReport {
        run_timestamp: aggregation.run_timestamp,
        samples_sent,
        policies_ok,
        failed_policies: aggregation.failures,
        skipped_rows,
    };
    info!(
        samples_sent = report.samples_sent,
        policies_ok = report.policies_ok,
        policies_failed = report.failed_policies.len(),
        rows_skipped = report.skipped_rows.len(),
        "run complete"
    );
    Ok(report)
}
