// PostgreSQL flow store tests. Run only when TEST_DATABASE_URL points at a server
// the tests may create schemas on; each test works in its own schema.

mod common;

use std::time::Duration;

use common::{T, store_config, t};
use flowtalk::config::FlowStoreConfig;
use flowtalk::flow_store::{FlowStore, FlowStoreClient};
use flowtalk::models::*;
use flowtalk::port_registry::refresh_from_reader;
use sqlx::PgPool;

const INGEST_ZONE: &str = "America/New_York";

struct PgFixture {
    admin: PgPool,
    schema: String,
    url: String,
}

impl PgFixture {
    async fn new(tag: &str) -> Option<Self> {
        let Ok(base) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return None;
        };
        let admin = PgPool::connect(&base).await.unwrap();
        let schema = format!("flowtalk_{tag}_{}", std::process::id());
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&admin)
            .await
            .unwrap();
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .unwrap();
        sqlx::query(&format!(
            "CREATE TABLE {schema}.records(
                ts TIMESTAMP WITHOUT TIME ZONE,
                destinationTransportPort INTEGER NOT NULL,
                octetDeltaCount BIGINT NOT NULL,
                miscellaneous JSONB)"
        ))
        .execute(&admin)
        .await
        .unwrap();
        sqlx::query(&format!(
            "CREATE TABLE {schema}.tcp_udp_ports(port INT NOT NULL, name VARCHAR(64) NOT NULL, PRIMARY KEY(port))"
        ))
        .execute(&admin)
        .await
        .unwrap();

        let sep = if base.contains('?') { '&' } else { '?' };
        let url = format!("{base}{sep}options[search_path]={schema}");
        Some(Self { admin, schema, url })
    }

    fn config(&self, timezone: &str) -> FlowStoreConfig {
        FlowStoreConfig {
            timezone: Some(timezone.to_string()),
            ..store_config(&self.url)
        }
    }

    async fn store(&self, timezone: &str) -> FlowStoreClient {
        FlowStoreClient::connect(&self.config(timezone)).await.unwrap()
    }

    /// One record stamped the way the ingester does: wall-clock time in
    /// `INGEST_ZONE`, `back_secs` before `upper` (unix seconds) or before now.
    async fn insert_flow(&self, upper: Option<f64>, back_secs: f64, port: i32, bytes: i64, misc: &str) {
        sqlx::query(&format!(
            "INSERT INTO {}.records(ts, destinationTransportPort, octetDeltaCount, miscellaneous)
             VALUES ((COALESCE(to_timestamp($2), now()) AT TIME ZONE $1) - make_interval(secs => $3), $4, $5, $6::jsonb)",
            self.schema
        ))
        .bind(INGEST_ZONE)
        .bind(upper)
        .bind(back_secs)
        .bind(port)
        .bind(bytes)
        .bind(misc)
        .execute(&self.admin)
        .await
        .unwrap();
    }

    async fn insert_port_name(&self, port: i32, name: &str) {
        sqlx::query(&format!(
            "INSERT INTO {}.tcp_udp_ports(port, name) VALUES ($1, $2)",
            self.schema
        ))
        .bind(port)
        .bind(name)
        .execute(&self.admin)
        .await
        .unwrap();
    }

    async fn teardown(self) {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .unwrap();
    }
}

const V4: &str = r#"{"ipVersion":"4"}"#;

fn pinned() -> TimeWindow {
    TimeWindow::ending_at(Duration::from_secs(300), t())
}

#[tokio::test]
async fn store_clock_window_follows_ingest_zone() {
    let Some(fx) = PgFixture::new("clock").await else {
        return;
    };
    fx.insert_port_name(22, "ssh").await;
    for _ in 0..5 {
        fx.insert_flow(None, 5.0, 22, 200, V4).await;
    }
    fx.insert_flow(None, 600.0, 22, 9_999, V4).await;

    let policy = AggregationPolicy::top_ports(10);
    let window = TimeWindow::trailing(Duration::from_secs(300));

    let store = fx.store(INGEST_ZONE).await;
    let rows = store.query(&policy, &window).await.unwrap();
    assert_eq!(rows, vec![AggregateRow::port(22, "ssh", 1000, 5)]);

    // Read in a zone 13+ hours ahead, the same rows are long past.
    let skewed = fx.store("Asia/Tokyo").await;
    assert!(skewed.query(&policy, &window).await.unwrap().is_empty());

    fx.teardown().await;
}

#[tokio::test]
async fn pinned_window_bounds_in_ingest_zone() {
    let Some(fx) = PgFixture::new("bounds").await else {
        return;
    };
    fx.insert_port_name(22, "ssh").await;
    let upper = Some(T as f64);
    fx.insert_flow(upper, 300.0, 22, 1, V4).await;
    fx.insert_flow(upper, 1.0, 22, 10, V4).await;
    fx.insert_flow(upper, 300.000_001, 22, 100, V4).await;
    fx.insert_flow(upper, 0.0, 22, 1000, V4).await;

    let store = fx.store(INGEST_ZONE).await;
    let rows = store
        .query(&AggregationPolicy::top_ports(10), &pinned())
        .await
        .unwrap();
    assert_eq!(rows, vec![AggregateRow::port(22, "ssh", 11, 2)]);

    fx.teardown().await;
}

#[tokio::test]
async fn unknown_ports_excluded_or_labeled() {
    let Some(fx) = PgFixture::new("labels").await else {
        return;
    };
    fx.insert_port_name(22, "ssh").await;
    let upper = Some(T as f64);
    fx.insert_flow(upper, 1.0, 22, 100, V4).await;
    for _ in 0..3 {
        fx.insert_flow(upper, 2.0, 9999, 50, V4).await;
    }

    let store = fx.store(INGEST_ZONE).await;
    let excluded = store
        .query(&AggregationPolicy::top_ports(10), &pinned())
        .await
        .unwrap();
    assert_eq!(excluded, vec![AggregateRow::port(22, "ssh", 100, 1)]);

    let labeled = store
        .query(
            &AggregationPolicy::top_ports(10).with_sentinel("unknown"),
            &pinned(),
        )
        .await
        .unwrap();
    assert_eq!(
        labeled,
        vec![
            AggregateRow::port(9999, "unknown", 150, 3),
            AggregateRow::port(22, "ssh", 100, 1),
        ]
    );

    fx.teardown().await;
}

#[tokio::test]
async fn ip_version_read_from_string_or_number() {
    let Some(fx) = PgFixture::new("ipver").await else {
        return;
    };
    let upper = Some(T as f64);
    for _ in 0..4 {
        fx.insert_flow(upper, 1.0, 80, 10, "{}").await;
    }
    fx.insert_flow(upper, 1.0, 22, 100, V4).await;
    fx.insert_flow(upper, 1.0, 22, 100, r#"{"ipVersion":4}"#).await;
    fx.insert_flow(upper, 1.0, 443, 700, r#"{"ipVersion":"6"}"#).await;

    let store = fx.store(INGEST_ZONE).await;
    let rows = store
        .query(&AggregationPolicy::top_ip_versions(2), &pinned())
        .await
        .unwrap();
    assert_eq!(
        rows,
        vec![
            AggregateRow::ip_version(Some(4), 200, 2),
            AggregateRow::ip_version(Some(6), 700, 1),
        ]
    );

    fx.teardown().await;
}

#[tokio::test]
async fn port_table_refresh_replaces_rows() {
    let Some(fx) = PgFixture::new("refresh").await else {
        return;
    };
    fx.insert_port_name(7, "echo").await;

    let store = fx.store(INGEST_ZONE).await;
    let inserted = refresh_from_reader(&store, "ssh,22,tcp,\nhttps,443,tcp,\n".as_bytes())
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let names: Vec<(i32, String)> = sqlx::query_as(&format!(
        "SELECT port, name FROM {}.tcp_udp_ports ORDER BY port",
        fx.schema
    ))
    .fetch_all(&fx.admin)
    .await
    .unwrap();
    assert_eq!(
        names,
        vec![(22, "ssh".to_string()), (443, "https".to_string())]
    );

    fx.teardown().await;
}
