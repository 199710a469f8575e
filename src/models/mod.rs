// Domain models: policies, windows, rows and samples

mod policy;
mod port;
mod row;
mod sample;
mod window;

pub use policy::{
    AggregationPolicy, DEFAULT_LIMIT, DEFAULT_SENTINEL, GroupBy, MetricTemplate, MissingLabel,
    Placeholder, default_policies,
};
pub use port::{MAX_SERVICE_NAME_LEN, PortNameEntry};
pub use row::{AggregateRow, GroupKey};
pub use sample::MetricSample;
pub use window::{TimeWindow, WindowAnchor};
