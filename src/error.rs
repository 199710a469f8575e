// Error taxonomy for one export run: query, encoding, delivery, configuration, refresh.

use std::time::Duration;

use thiserror::Error;

/// A flow-store query for one aggregation policy failed.
///
/// Scoped to a single policy; whether the rest of the run continues is decided
/// by `run.on_query_error`.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("policy '{policy}': flow store unreachable: {source}")]
    Connect {
        policy: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("policy '{policy}': query failed: {source}")]
    Database {
        policy: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("policy '{policy}': query exceeded {timeout:?}")]
    Timeout { policy: String, timeout: Duration },

    #[error("policy '{policy}': cannot decode row: {reason}")]
    Decode { policy: String, reason: String },
}

impl QueryError {
    /// Classifies a driver error raised while running `policy`'s query.
    pub fn from_sqlx(policy: &str, source: sqlx::Error) -> Self {
        let policy = policy.to_string();
        match source {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Self::Connect { policy, source },
            other => Self::Database {
                policy,
                source: other,
            },
        }
    }

    pub fn policy(&self) -> &str {
        match self {
            Self::Connect { policy, .. }
            | Self::Database { policy, .. }
            | Self::Timeout { policy, .. }
            | Self::Decode { policy, .. } => policy,
        }
    }
}

/// An aggregate row could not be turned into a line-protocol sample.
/// The row is logged and skipped; the rest of the run is unaffected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("row for policy '{policy}' has no IP version")]
    MissingIpVersion { policy: String },

    #[error("metric name {name:?} is not a single printable ASCII token")]
    InvalidMetricName { name: String },

    #[error("negative byte total {value} for metric '{name}'")]
    NegativeValue { name: String, value: i64 },
}

/// Sending the run's samples to the metrics sink failed.
///
/// `written` is how many samples were fully handed to the socket before the
/// failure; the remainder are not retried within the run.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write to {address} failed after {written}/{total} samples: {source}")]
    Write {
        address: String,
        written: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("delivery to {address} exceeded {deadline:?} after {written}/{total} samples")]
    Timeout {
        address: String,
        deadline: Duration,
        written: usize,
        total: usize,
    },

    #[error("closing connection to {address} failed after {written}/{total} samples: {source}")]
    Shutdown {
        address: String,
        written: usize,
        total: usize,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    /// Samples that reached the socket before the failure.
    pub fn written(&self) -> usize {
        match self {
            Self::Connect { .. } => 0,
            Self::Write { written, .. }
            | Self::Timeout { written, .. }
            | Self::Shutdown { written, .. } => *written,
        }
    }
}

/// Invalid or unreadable configuration. Fatal at startup; no run is attempted.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("cannot read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

/// The port-name registry refresh failed; the existing table is left untouched.
#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("fetch {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("registry feed is not valid CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("registry feed contained no usable port entries")]
    Empty,

    #[error("port table write failed: {0}")]
    Store(#[from] sqlx::Error),
}

/// A run that did not deliver its batch.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("run aborted on policy '{policy}': {source}")]
    Aborted {
        policy: String,
        #[source]
        source: QueryError,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}
