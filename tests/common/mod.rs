// Shared test helpers: SQLite flow store fixture, in-memory fakes for store and sink.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowtalk::config::FlowStoreConfig;
use flowtalk::delivery::SampleSink;
use flowtalk::error::{DeliveryError, QueryError};
use flowtalk::flow_store::{FlowStore, SqliteFlowStore};
use flowtalk::models::*;
use flowtalk::ranking;
use tempfile::TempDir;

/// Run instant used by pinned-window tests.
pub const T: i64 = 1_700_000_000;

pub fn t() -> DateTime<Utc> {
    DateTime::from_timestamp(T, 0).unwrap()
}

pub fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

const RECORDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    ts INTEGER NOT NULL,
    protocolIdentifier INTEGER NOT NULL DEFAULT 6,
    destinationTransportPort INTEGER NOT NULL,
    octetDeltaCount INTEGER NOT NULL,
    miscellaneous TEXT
)
"#;

const PORTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tcp_udp_ports(port INT NOT NULL, name VARCHAR(64) NOT NULL, PRIMARY KEY(port))";

pub fn sqlite_url(dir: &TempDir) -> String {
    format!("sqlite:{}?mode=rwc", dir.path().join("flows.db").display())
}

pub fn store_config(url: &str) -> FlowStoreConfig {
    FlowStoreConfig {
        url: url.to_string(),
        max_connections: 1,
        query_timeout_secs: 30,
        timezone: None,
    }
}

/// Fresh store with empty `records` and `tcp_udp_ports`.
pub async fn sqlite_store(dir: &TempDir) -> SqliteFlowStore {
    let store = SqliteFlowStore::connect(&sqlite_url(dir), 1).await.unwrap();
    sqlx::query(RECORDS_SCHEMA)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(PORTS_SCHEMA)
        .execute(store.pool())
        .await
        .unwrap();
    store
}

pub async fn insert_flow(
    store: &SqliteFlowStore,
    ts_us: i64,
    port: u16,
    bytes: i64,
    ip_version: Option<i64>,
) {
    // attribute values are JSON strings, as the ingester writes them
    let misc = match ip_version {
        Some(v) => serde_json::json!({ "ipVersion": v.to_string() }),
        None => serde_json::json!({}),
    };
    insert_flow_with_misc(store, ts_us, port, bytes, &misc.to_string()).await;
}

pub async fn insert_flow_with_misc(
    store: &SqliteFlowStore,
    ts_us: i64,
    port: u16,
    bytes: i64,
    misc: &str,
) {
    sqlx::query(
        "INSERT INTO records (ts, destinationTransportPort, octetDeltaCount, miscellaneous) VALUES ($1, $2, $3, $4)",
    )
    .bind(ts_us)
    .bind(i64::from(port))
    .bind(bytes)
    .bind(misc)
    .execute(store.pool())
    .await
    .unwrap();
}

pub async fn insert_port_name(store: &SqliteFlowStore, port: u16, name: &str) {
    sqlx::query("INSERT INTO tcp_udp_ports (port, name) VALUES ($1, $2)")
        .bind(i64::from(port))
        .bind(name)
        .execute(store.pool())
        .await
        .unwrap();
}

/// `count` flows of `bytes_each` on `port`, one second apart, ending 1s before `upper`.
pub async fn insert_flows(
    store: &SqliteFlowStore,
    upper: DateTime<Utc>,
    port: u16,
    count: i64,
    bytes_each: i64,
    ip_version: Option<i64>,
) {
    for i in 0..count {
        insert_flow(
            store,
            micros(upper) - (i + 1) * 1_000_000,
            port,
            bytes_each,
            ip_version,
        )
        .await;
    }
}

/// In-memory store keyed by policy name. Policies without an entry fail.
#[derive(Default)]
pub struct FakeStore {
    rows: HashMap<String, Vec<AggregateRow>>,
    delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_rows(mut self, policy: &str, rows: Vec<AggregateRow>) -> Self {
        self.rows.insert(policy.to_string(), rows);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl FlowStore for FakeStore {
    async fn query(
        &self,
        policy: &AggregationPolicy,
        _window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        self.calls.lock().unwrap().push(policy.name.clone());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let Some(rows) = self.rows.get(&policy.name) else {
            return Err(QueryError::Decode {
                policy: policy.name.clone(),
                reason: "no such table".into(),
            });
        };
        let mut rows = rows.clone();
        ranking::rank_and_truncate(&mut rows, policy.limit);
        Ok(rows)
    }
}

/// Records every delivered batch; optionally fails after `fail_after` samples.
#[derive(Default)]
pub struct RecordingSink {
    pub fail_after: Option<usize>,
    pub batches: Mutex<Vec<Vec<MetricSample>>>,
}

impl RecordingSink {
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_after: Some(n),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<MetricSample>> {
        self.batches.lock().unwrap().clone()
    }
}

impl SampleSink for RecordingSink {
    async fn deliver(&self, samples: &[MetricSample]) -> Result<usize, DeliveryError> {
        match self.fail_after {
            Some(n) if n < samples.len() => {
                self.batches.lock().unwrap().push(samples[..n].to_vec());
                Err(DeliveryError::Write {
                    address: "fake".into(),
                    written: n,
                    total: samples.len(),
                    source: std::io::Error::from(std::io::ErrorKind::ConnectionReset),
                })
            }
            _ => {
                self.batches.lock().unwrap().push(samples.to_vec());
                Ok(samples.len())
            }
        }
    }
}

/// Minimal valid config pointing at `store_url` and `sink_address`.
pub fn config_toml(store_url: &str, sink_address: &str) -> String {
    format!(
        r#"
[flow_store]
url = "{store_url}"

[sink]
address = "{sink_address}"
deadline_secs = 5

[run]
window_secs = 300
"#
    )
}
