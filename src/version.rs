// Package identity for the startup banner and the registry fetch User-Agent.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const NAME: &str = env!("CARGO_PKG_NAME");

/// `flowtalk/<version>`
pub fn user_agent() -> String {
    format!("{NAME}/{VERSION}")
}
