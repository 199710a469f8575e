// Windowed aggregator: one pass over all policies, in configuration order.
// Policies are independent; no cross-policy deduplication.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};

use crate::config::{AppConfig, OnQueryError};
use crate::encoder;
use crate::error::{EncodingError, QueryError, RunError};
use crate::flow_store::FlowStore;
use crate::models::{AggregateRow, AggregationPolicy, MetricSample, TimeWindow};

/// Ranked rows of one policy.
#[derive(Debug)]
pub struct PolicyRows<'p> {
    pub policy: &'p AggregationPolicy,
    pub rows: Vec<AggregateRow>,
}

/// Everything one run gathered from the flow store.
#[derive(Debug)]
pub struct Aggregation<'p> {
    /// Captured once at run start; stamped on every sample.
    pub run_timestamp: i64,
    pub results: Vec<PolicyRows<'p>>,
    /// Policies whose query failed (only in `continue` mode).
    pub failures: Vec<QueryError>,
}

impl Aggregation<'_> {
    /// Encodes every row in policy order, then rank order. Rows that fail to
    /// encode are returned separately and left out of the batch.
    pub fn encode(&self) -> (Vec<MetricSample>, Vec<EncodingError>) {
        let mut samples = Vec::new();
        let mut skipped = Vec::new();
        for result in &self.results {
            for row in &result.rows {
                match encoder::encode(row, result.policy, self.run_timestamp) {
                    Ok(s) => samples.push(s),
                    Err(e) => {
                        warn!(policy = %result.policy.name, key = %row.group_key, error = %e, "row skipped");
                        skipped.push(e);
                    }
                }
            }
        }
        (samples, skipped)
    }
}

pub struct Aggregator<'p> {
    policies: &'p [AggregationPolicy],
    window: TimeWindow,
    query_timeout: Duration,
    on_query_error: OnQueryError,
}

impl<'p> Aggregator<'p> {
    pub fn new(
        policies: &'p [AggregationPolicy],
        window: TimeWindow,
        query_timeout: Duration,
        on_query_error: OnQueryError,
    ) -> Self {
        Self {
            policies,
            window,
            query_timeout,
            on_query_error,
        }
    }

    pub fn from_config(config: &'p AppConfig) -> Self {
        Self::new(
            &config.policies,
            config.window(),
            config.query_timeout(),
            config.run.on_query_error,
        )
    }

    /// Same aggregator over a different window (replaying a past period).
    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    /// Queries every policy. In `abort` mode the first failure ends the run.
    #[instrument(skip(self, store), fields(policies = self.policies.len(), run_timestamp = now.timestamp()))]
    pub async fn collect<S: FlowStore>(
        &self,
        store: &S,
        now: DateTime<Utc>,
    ) -> Result<Aggregation<'p>, RunError> {
        let run_timestamp = now.timestamp();
        let mut results = Vec::with_capacity(self.policies.len());
        let mut failures = Vec::new();

        for policy in self.policies {
            match self.query_one(store, policy).await {
                Ok(rows) => results.push(PolicyRows { policy, rows }),
                Err(e) => match self.on_query_error {
                    OnQueryError::Abort => {
                        return Err(RunError::Aborted {
                            policy: policy.name.clone(),
                            source: e,
                        });
                    }
                    OnQueryError::Continue => {
                        warn!(policy = %policy.name, error = %e, "policy query failed, continuing");
                        failures.push(e);
                    }
                },
            }
        }

        Ok(Aggregation {
            run_timestamp,
            results,
            failures,
        })
    }

    async fn query_one<S: FlowStore>(
        &self,
        store: &S,
        policy: &AggregationPolicy,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        match tokio::time::timeout(self.query_timeout, store.query(policy, &self.window)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout {
                policy: policy.name.clone(),
                timeout: self.query_timeout,
            }),
        }
    }
}
