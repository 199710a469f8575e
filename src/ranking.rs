// Deterministic ranking of aggregate rows.
//
// Rows are ranked by record count even though the emitted value is the byte total.
// Tie-breaks: higher byte total first, then ascending group key (port, then name;
// known IP versions before unknown). The SQL backends ORDER BY the same rule; it is
// re-applied after fetch so every backend yields an identical order.

use std::cmp::Ordering;

use crate::models::{AggregateRow, GroupKey};

/// Total order used to rank rows within one policy.
pub fn rank_order(a: &AggregateRow, b: &AggregateRow) -> Ordering {
    b.record_count
        .cmp(&a.record_count)
        .then_with(|| b.total_bytes.cmp(&a.total_bytes))
        .then_with(|| group_key_order(&a.group_key, &b.group_key))
}

fn group_key_order(a: &GroupKey, b: &GroupKey) -> Ordering {
    match (a, b) {
        (
            GroupKey::Port {
                port: pa,
                name: na,
            },
            GroupKey::Port {
                port: pb,
                name: nb,
            },
        ) => pa.cmp(pb).then_with(|| na.cmp(nb)),
        (GroupKey::IpVersion(va), GroupKey::IpVersion(vb)) => match (va, vb) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
        (GroupKey::Port { .. }, GroupKey::IpVersion(_)) => Ordering::Less,
        (GroupKey::IpVersion(_), GroupKey::Port { .. }) => Ordering::Greater,
    }
}

/// Sorts rows into rank order and keeps at most `limit`.
pub fn rank_and_truncate(rows: &mut Vec<AggregateRow>, limit: u32) {
    rows.sort_by(rank_order);
    rows.truncate(limit as usize);
}

/// True when `rows` is in rank order with non-increasing record counts.
pub fn is_ranked(rows: &[AggregateRow]) -> bool {
    rows.windows(2)
        .all(|w| rank_order(&w[0], &w[1]) != Ordering::Greater)
}
