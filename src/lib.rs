// Library for tests to access modules

pub mod aggregator;
pub mod config;
pub mod delivery;
pub mod encoder;
pub mod error;
pub mod flow_store;
pub mod models;
pub mod pipeline;
pub mod port_registry;
pub mod ranking;
pub mod scheduler;
pub mod version;
