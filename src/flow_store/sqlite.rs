// SQLite flow store: same tables, `records.ts` as unix microseconds, `miscellaneous` as JSON text.

use std::str::FromStr;

use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::instrument;

use super::sql::{self, Dialect};
use super::{decode_row, finish_rows};
use crate::error::QueryError;
use crate::models::{AggregateRow, AggregationPolicy, PortNameEntry, TimeWindow};

pub struct SqliteFlowStore {
    pool: SqlitePool,
}

impl SqliteFlowStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let opts = SqliteConnectOptions::from_str(url)?
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip(self, policy, window), fields(store = "sqlite", policy = %policy.name))]
    pub async fn fetch_ranked(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        let text = sql::aggregate_query(Dialect::Sqlite, policy);
        let mut q = sqlx::query(&text)
            .bind(window.duration_micros())
            .bind(window.anchor_micros())
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
    #[instrument(skip(self, entries), fields(store = "sqlite", entries = entries.len()))]
    pub async fn replace_port_names(&self, entries: &[PortNameEntry]) -> Result<u64, sqlx::Error> {
        sqlx::query(sql::CREATE_PORT_TABLE)
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM tcp_udp_ports")
            .execute(&mut *tx)
            .await?;
        let mut inserted = 0;
        for e in entries {
            inserted += sqlx::query(sql::INSERT_PORT_NAME)
                .bind(i64::from(e.port))
                .bind(&e.name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}
