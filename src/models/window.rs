// Trailing time window, evaluated against the store clock unless pinned.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Where the window's upper bound comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAnchor {
    /// The flow store's own clock at query time.
    StoreClock,
    /// A fixed instant (replaying an earlier period).
    At(DateTime<Utc>),
}

/// Half-open interval `[upper - duration, upper)`. Built fresh for every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub duration: Duration,
    pub anchor: WindowAnchor,
}

impl TimeWindow {
    pub fn trailing(duration: Duration) -> Self {
        Self {
            duration,
            anchor: WindowAnchor::StoreClock,
        }
    }

    pub fn ending_at(duration: Duration, upper: DateTime<Utc>) -> Self {
        Self {
            duration,
            anchor: WindowAnchor::At(upper),
        }
    }

    pub fn duration_micros(&self) -> i64 {
        i64::try_from(self.duration.as_micros()).unwrap_or(i64::MAX)
    }

    /// Pinned upper bound in unix microseconds, if any.
    pub fn anchor_micros(&self) -> Option<i64> {
        match self.anchor {
            WindowAnchor::StoreClock => None,
            WindowAnchor::At(t) => Some(t.timestamp_micros()),
        }
    }
}
