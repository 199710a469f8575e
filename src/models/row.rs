// Result rows of one policy query.

use std::fmt;

/// Group a row was aggregated under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Port { port: u16, name: String },
    /// None when the records carry no `ipVersion` attribute.
    IpVersion(Option<i64>),
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port { port, name } => write!(f, "{name}/{port}"),
            Self::IpVersion(Some(v)) => write!(f, "ipv{v}"),
            Self::IpVersion(None) => f.write_str("ipv?"),
        }
    }
}

/// One ranked group: sum of `octetdeltacount` and number of flow records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    pub group_key: GroupKey,
    pub total_bytes: i64,
    pub record_count: i64,
}

impl AggregateRow {
    pub fn port(port: u16, name: impl Into<String>, total_bytes: i64, record_count: i64) -> Self {
        Self {
            group_key: GroupKey::Port {
                port,
                name: name.into(),
            },
            total_bytes,
            record_count,
        }
    }

    pub fn ip_version(version: Option<i64>, total_bytes: i64, record_count: i64) -> Self {
        Self {
            group_key: GroupKey::IpVersion(version),
            total_bytes,
            record_count,
        }
    }
}
