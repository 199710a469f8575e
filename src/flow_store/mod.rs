// Flow store client: read-only ranked aggregate queries over the trailing window.
// The port-name table writer used by the registry refresh lives here too.

mod postgres;
mod sql;
mod sqlite;

pub use postgres::PgFlowStore;
pub use sqlite::SqliteFlowStore;

use std::future::Future;

use sqlx::{ColumnIndex, Decode, Row, Type};

use crate::config::FlowStoreConfig;
use crate::error::QueryError;
use crate::models::{AggregateRow, AggregationPolicy, GroupBy, GroupKey, PortNameEntry, TimeWindow};
use crate::ranking;

/// Source of ranked aggregate rows for one policy.
///
/// Implementations filter to the window, group by the policy key, sum
/// `octetdeltacount`, count records, rank by `ranking::rank_order` and keep at
/// most `policy.limit` rows. They never write.
pub trait FlowStore {
    fn query(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> impl Future<Output = Result<Vec<AggregateRow>, QueryError>> + Send;
}

/// Flow store chosen from the URL scheme.
///
/// Enum dispatch keeps the async calls static; the backends differ only in SQL dialect.
pub enum FlowStoreClient {
    Postgres(PgFlowStore),
    Sqlite(SqliteFlowStore),
}

impl FlowStoreClient {
    pub async fn connect(config: &FlowStoreConfig) -> Result<Self, sqlx::Error> {
        let url = config.url.as_str();
        if url.starts_with("sqlite:") {
            Ok(Self::Sqlite(
                SqliteFlowStore::connect(url, config.max_connections).await?,
            ))
        } else {
            Ok(Self::Postgres(
                PgFlowStore::connect(url, config.max_connections, config.timezone.as_deref())
                    .await?,
            ))
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Sqlite(_) => "sqlite",
        }
    }

    pub async fn replace_port_names(&self, entries: &[PortNameEntry]) -> Result<u64, sqlx::Error> {
        match self {
            Self::Postgres(s) => s.replace_port_names(entries).await,
            Self::Sqlite(s) => s.replace_port_names(entries).await,
        }
    }
}

impl FlowStore for FlowStoreClient {
    async fn query(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        match self {
            Self::Postgres(s) => s.fetch_ranked(policy, window).await,
            Self::Sqlite(s) => s.fetch_ranked(policy, window).await,
        }
    }
}

impl FlowStore for PgFlowStore {
    async fn query(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        self.fetch_ranked(policy, window).await
    }
}

impl FlowStore for SqliteFlowStore {
    async fn query(
        &self,
        policy: &AggregationPolicy,
        window: &TimeWindow,
    ) -> Result<Vec<AggregateRow>, QueryError> {
        self.fetch_ranked(policy, window).await
    }
}

/// Decodes one result row of `sql::aggregate_query` for either backend.
fn decode_row<'r, R>(policy: &AggregationPolicy, row: &'r R) -> Result<AggregateRow, QueryError>
where
    R: Row,
    for<'a> &'a str: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    let decode_err = |e: sqlx::Error| QueryError::Decode {
        policy: policy.name.clone(),
        reason: e.to_string(),
    };
    let total_bytes: i64 = row.try_get("n_bytes").map_err(decode_err)?;
    let record_count: i64 = row.try_get("n").map_err(decode_err)?;
    let group_key = match policy.group_by {
        GroupBy::Port => {
            let port: i64 = row.try_get("port").map_err(decode_err)?;
            let port = u16::try_from(port).map_err(|_| QueryError::Decode {
                policy: policy.name.clone(),
                reason: format!("destination port {port} out of range"),
            })?;
            let name: String = row.try_get("name").map_err(decode_err)?;
            GroupKey::Port { port, name }
        }
        GroupBy::IpVersion => {
            let version: Option<i64> = row.try_get("ipversion").map_err(decode_err)?;
            GroupKey::IpVersion(version)
        }
    };
    Ok(AggregateRow {
        group_key,
        total_bytes,
        record_count,
    })
}

/// Applies the shared ranking rule and limit to decoded rows.
fn finish_rows(policy: &AggregationPolicy, mut rows: Vec<AggregateRow>) -> Vec<AggregateRow> {
    ranking::rank_and_truncate(&mut rows, policy.limit);
    tracing::debug!(policy = %policy.name, rows = rows.len(), "aggregate rows fetched");
    rows
}
