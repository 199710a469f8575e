// SQL text for the per-policy aggregate queries.
//
// Parameters (both dialects):
//   $1 window length (seconds as float on PostgreSQL, microseconds on SQLite)
//   $2 pinned upper bound, NULL to use the store clock (timestamptz on PostgreSQL,
//      shifted into the session zone)
//   $3 row limit
//   $4 sentinel label for unknown ports (only when the policy keeps them)

use crate::models::{AggregationPolicy, GroupBy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// CTE yielding the window's upper bound as `bounds.upper_ts`.
    fn bounds_cte(self) -> &'static str {
        match self {
            Self::Postgres => {
                "WITH bounds AS (SELECT COALESCE($2::timestamptz::timestamp, LOCALTIMESTAMP) AS upper_ts)"
            }
            // records.ts holds unix microseconds
            Self::Sqlite => {
                "WITH bounds AS (SELECT COALESCE($2, CAST((julianday('now') - 2440587.5) * 86400000000.0 AS INTEGER)) AS upper_ts)"
            }
        }
    }

    fn window_predicate(self) -> &'static str {
        match self {
            Self::Postgres => {
                "r.ts >= b.upper_ts - make_interval(secs => $1) AND r.ts < b.upper_ts"
            }
            Self::Sqlite => "r.ts >= b.upper_ts - $1 AND r.ts < b.upper_ts",
        }
    }

    fn port_column(self) -> &'static str {
        match self {
            Self::Postgres => "r.destinationtransportport::bigint",
            Self::Sqlite => "r.destinationtransportport",
        }
    }

    fn bytes_column(self) -> &'static str {
        match self {
            Self::Postgres => "SUM(r.octetdeltacount)::bigint",
            Self::Sqlite => "SUM(r.octetdeltacount)",
        }
    }

    fn ip_version_column(self) -> &'static str {
        match self {
            Self::Postgres => "(r.miscellaneous->>'ipVersion')::bigint",
            // the ingester stores every attribute as a JSON string
            Self::Sqlite => "CAST(json_extract(r.miscellaneous, '$.ipVersion') AS INTEGER)",
        }
    }
}

/// Aggregate query for `policy`. Ordering matches `ranking::rank_order`.
pub(crate) fn aggregate_query(dialect: Dialect, policy: &AggregationPolicy) -> String {
    match policy.group_by {
        GroupBy::Port => port_query(dialect, policy.sentinel_label().is_some()),
        GroupBy::IpVersion => ip_version_query(dialect),
    }
}

fn port_query(dialect: Dialect, keep_unknown: bool) -> String {
    let (join, name) = if keep_unknown {
        ("LEFT JOIN", "COALESCE(p.name, $4)")
    } else {
        ("JOIN", "p.name")
    };
    format!(
        "{bounds}
SELECT {port} AS port, {name} AS name, {bytes} AS n_bytes, COUNT(*) AS n
FROM records r
CROSS JOIN bounds b
{join} tcp_udp_ports p ON p.port = r.destinationtransportport
WHERE {window}
GROUP BY r.destinationtransportport, p.name
ORDER BY n DESC, n_bytes DESC, port ASC, name ASC
LIMIT $3",
        bounds = dialect.bounds_cte(),
        port = dialect.port_column(),
        bytes = dialect.bytes_column(),
        window = dialect.window_predicate(),
    )
}

fn ip_version_query(dialect: Dialect) -> String {
    format!(
        "{bounds}
SELECT {version} AS ipversion, {bytes} AS n_bytes, COUNT(*) AS n
FROM records r
CROSS JOIN bounds b
WHERE {window} AND {version} IS NOT NULL
GROUP BY ipversion
ORDER BY n DESC, n_bytes DESC, ipversion ASC
LIMIT $3",
        bounds = dialect.bounds_cte(),
        version = dialect.ip_version_column(),
        bytes = dialect.bytes_column(),
        window = dialect.window_predicate(),
    )
}

pub(crate) const CREATE_PORT_TABLE: &str =
    "CREATE TABLE IF NOT EXISTS tcp_udp_ports(port INT NOT NULL, name VARCHAR(64) NOT NULL, PRIMARY KEY(port))";

pub(crate) const INSERT_PORT_NAME: &str = "INSERT INTO tcp_udp_ports(port, name) VALUES($1, $2)";
