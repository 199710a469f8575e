// Encoder tests: line format, value choice, invalid rows

use flowtalk::encoder::{encode, encode_line};
use flowtalk::error::EncodingError;
use flowtalk::models::*;

#[test]
fn port_row_encodes_name_and_port() {
    let row = AggregateRow::port(443, "https", 5000, 7);
    let line = encode_line(&row, &AggregationPolicy::top_ports(10), 1_700_000_000).unwrap();
    assert_eq!(line, "net.https-443 5000 1700000000\n");
}

#[test]
fn ip_version_row_encodes_version() {
    let row = AggregateRow::ip_version(Some(4), 900, 3);
    let line = encode_line(&row, &AggregationPolicy::top_ip_versions(10), 1_234).unwrap();
    assert_eq!(line, "net.ipv4 900 1234\n");
}

#[test]
fn value_is_byte_total_not_record_count() {
    let row = AggregateRow::port(22, "ssh", 1000, 5);
    let sample = encode(&row, &AggregationPolicy::top_ports(10), 42).unwrap();
    assert_eq!(sample.value, 1000);
    assert_eq!(sample.unix_timestamp, 42);
    assert_eq!(sample.metric_name, "net.ssh-22");
}

#[test]
fn sentinel_label_renders_like_a_name() {
    let policy = AggregationPolicy::top_ports(10).with_sentinel("unknown");
    let row = AggregateRow::port(9999, "unknown", 10, 1);
    assert_eq!(
        encode_line(&row, &policy, 7).unwrap(),
        "net.unknown-9999 10 7\n"
    );
}

#[test]
fn custom_template() {
    let mut policy = AggregationPolicy::top_ports(10);
    policy.metric = MetricTemplate::parse("flows.port.{port}.{name}").unwrap();
    let row = AggregateRow::port(53, "domain", 64, 1);
    assert_eq!(
        encode_line(&row, &policy, 1).unwrap(),
        "flows.port.53.domain 64 1\n"
    );
}

#[test]
fn missing_ip_version_is_an_encoding_error() {
    let policy = AggregationPolicy::top_ip_versions(10);
    let row = AggregateRow::ip_version(None, 100, 1);
    assert_eq!(
        encode(&row, &policy, 1).unwrap_err(),
        EncodingError::MissingIpVersion {
            policy: "ip_versions".into()
        }
    );
}

#[test]
fn name_with_whitespace_is_rejected() {
    let row = AggregateRow::port(8080, "http alt", 1, 1);
    let err = encode(&row, &AggregationPolicy::top_ports(10), 1).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidMetricName { .. }));
}

#[test]
fn negative_total_is_rejected() {
    let row = AggregateRow::port(80, "http", -1, 1);
    let err = encode(&row, &AggregationPolicy::top_ports(10), 1).unwrap_err();
    assert!(matches!(err, EncodingError::NegativeValue { value: -1, .. }));
}

#[test]
fn line_is_ascii_with_single_trailing_newline() {
    let row = AggregateRow::port(443, "https", 5000, 7);
    let line = encode_line(&row, &AggregationPolicy::top_ports(10), 1_700_000_000).unwrap();
    assert!(line.is_ascii());
    assert_eq!(line.matches('\n').count(), 1);
    assert!(line.ends_with('\n'));
    assert_eq!(line.split(' ').count(), 3);
}
