// Wire unit: one line-protocol sample.

use std::fmt;

/// `<metric_name> <value> <unix_timestamp>`; every sample of a run shares the timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub metric_name: String,
    pub value: i64,
    pub unix_timestamp: i64,
}

impl MetricSample {
    /// Line as sent on the wire, newline-terminated.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.metric_name, self.value, self.unix_timestamp
        )
    }
}
