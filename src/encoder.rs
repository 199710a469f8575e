// Row -> line-protocol sample. Pure; no I/O.

use crate::error::EncodingError;
use crate::models::{AggregateRow, AggregationPolicy, GroupKey, MetricSample};

/// Builds the sample for one ranked row.
///
/// The value is the row's byte total; its record count only decides rank.
pub fn encode(
    row: &AggregateRow,
    policy: &AggregationPolicy,
    run_timestamp: i64,
) -> Result<MetricSample, EncodingError> {
    if let GroupKey::IpVersion(None) = row.group_key {
        return Err(EncodingError::MissingIpVersion {
            policy: policy.name.clone(),
        });
    }
    let metric_name = policy.metric.render(&row.group_key);
    if !is_metric_token(&metric_name) {
        return Err(EncodingError::InvalidMetricName { name: metric_name });
    }
    if row.total_bytes < 0 {
        return Err(EncodingError::NegativeValue {
            name: metric_name,
            value: row.total_bytes,
        });
    }
    Ok(MetricSample {
        metric_name,
        value: row.total_bytes,
        unix_timestamp: run_timestamp,
    })
}

/// Encodes a line directly: `"<metric_name> <value> <run_timestamp>\n"`.
pub fn encode_line(
    row: &AggregateRow,
    policy: &AggregationPolicy,
    run_timestamp: i64,
) -> Result<String, EncodingError> {
    encode(row, policy, run_timestamp).map(|s| s.to_line())
}

// Spaces or control bytes would split or corrupt the line.
fn is_metric_token(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic())
}
