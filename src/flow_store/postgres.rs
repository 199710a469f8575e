// PostgreSQL flow store: `records` (ts TIMESTAMP, miscellaneous JSONB) + `tcp_udp_ports`.
//
// `records.ts` is the ingester's `NOW()` in the server's local zone. Every session
// runs in that zone so `LOCALTIMESTAMP` and pinned anchors compare in the same clock.

use std::str::FromStr;

use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, instrument};

use super::sql::{self, Dialect};
use super::{decode_row, finish_rows};
use crate::error::QueryError;
use crate::models::{AggregateRow, AggregationPolicy, PortNameEntry, TimeWindow, WindowAnchor};

const SET_TIMEZONE: &str = "SELECT set_config('TimeZone', $1, false)";

// sqlx starts sessions in UTC; `log_timezone` keeps the zone initdb configured.
const ADOPT_SERVER_TIMEZONE: &str =
    "SELECT set_config('TimeZone', current_setting('log_timezone'), false)";

pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    /// Connects with every session in `timezone`, or the server's zone when `None`.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        timezone: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let opts = PgConnectOptions::from_str(url)?.application_name("flowtalk");
        let timezone = timezone.map(str::to_owned);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(move |conn, _meta| {
                let timezone = timezone.clone();
                Box::pin(async move {
                    let set_zone = match timezone {
                        Some(tz) => sqlx::query(SET_TIMEZONE).bind(tz),
                        None => sqlx::query(ADOPT_SERVER_TIMEZONE),
                    };
                    set_zone.execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(opts)
            .await?;

        let zone: String = sqlx::query_scalar("SELECT current_setting('TimeZone')")
            .fetch_one(&pool)
            .await?;
        info!(timezone = %zone, "flow store session zone");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self, policy, window), fields(store = "postgres", policy = %policy.name))]
    pub async fn fetch_ranked(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        let text = sql::aggregate_query(Dialect::Postgres, policy);
        let upper = match window.anchor {
            WindowAnchor::StoreClock => None,
            WindowAnchor::At(t) => Some(t),
        };
        let mut q = sqlx::query(&text)
            .bind(window.duration.as_secs_f64())
            .bind(upper)
            .bind(i64::from(policy.limit));
        if let Some(sentinel) = policy.sentinel_label() {
            q = q.bind(sentinel);
        }

        let mut stream = q.fetch(&self.pool);
        let mut rows = Vec::new();
        while let Some(row) = stream
            .try_next()
            .await
            .map_err(|e| QueryError::from_sqlx(&policy.name, e))?
        {
            rows.push(decode_row(policy, &row)?);
        }
        Ok(finish_rows(policy, rows))
    }

    /// Replaces the whole port-name table in one transaction.
    #[instrument(skip(self, entries), fields(store = "postgres", entries = entries.len()))]
    pub async fn replace_port_names(&self, entries: &[PortNameEntry]) -> Result<u64, sqlx::Error> {
        sqlx::query(sql::CREATE_PORT_TABLE)
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("TRUNCATE tcp_udp_ports")
            .execute(&mut *tx)
            .await?;
        let mut inserted = 0;
        for e in entries {
            inserted += sqlx::query(sql::INSERT_PORT_NAME)
                .bind(i32::from(e.port))
                .bind(&e.name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}
