use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::models::{AggregationPolicy, GroupBy, MissingLabel, TimeWindow, default_policies};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub flow_store: FlowStoreConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default = "default_policies", rename = "policy")]
    pub policies: Vec<AggregationPolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowStoreConfig {
    /// `postgres://...` or `sqlite:...`
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Zone the ingester's `NOW()` wrote `records.ts` in (PostgreSQL only).
    /// Unset: the server's configured zone.
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_max_connections() -> u32 {
    1
}

fn default_query_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// `host:port` of the line-protocol listener.
    pub address: String,
    /// Bounds connect + all writes + close for one run.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_deadline_secs() -> u64 {
    30
}

/// Whether a failed policy query stops the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnQueryError {
    /// Log the failure, skip that policy, deliver the others.
    #[default]
    Continue,
    /// Deliver nothing for this run.
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default)]
    pub on_query_error: OnQueryError,
    /// Period of the `serve` loop when no cron schedule is set.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Optional cron expression for the `serve` loop (e.g. "0 */5 * * * *"). Uses local time.
    #[serde(default)]
    pub schedule: Option<String>,
}

fn default_window_secs() -> u64 {
    300
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            on_query_error: OnQueryError::default(),
            interval_secs: default_interval_secs(),
            schedule: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: u64,
}

pub const IANA_SERVICE_NAMES_URL: &str =
    "https://www.iana.org/assignments/service-names-port-numbers/service-names-port-numbers.csv";

fn default_registry_url() -> String {
    IANA_SERVICE_NAMES_URL.to_string()
}

fn default_registry_timeout_secs() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            timeout_secs: default_registry_timeout_secs(),
        }
    }
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(ConfigurationError::Invalid(format!($($arg)+)));
        }
    };
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigurationError> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        Self::load_from_path(&path)
    }

    pub fn load_from_path(path: &str) -> Result<Self, ConfigurationError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> Result<Self, ConfigurationError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::trailing(Duration::from_secs(self.run.window_secs))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_store.query_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let url = self.flow_store.url.as_str();
        ensure!(!url.is_empty(), "flow_store.url must be non-empty");
        ensure!(
            url.starts_with("postgres://")
                || url.starts_with("postgresql://")
                || url.starts_with("sqlite:"),
            "flow_store.url must start with postgres://, postgresql:// or sqlite:, got {}",
            url
        );
        ensure!(
            self.flow_store.max_connections > 0,
            "flow_store.max_connections must be > 0, got {}",
            self.flow_store.max_connections
        );
        ensure!(
            self.flow_store.query_timeout_secs > 0,
            "flow_store.query_timeout_secs must be > 0, got {}",
            self.flow_store.query_timeout_secs
        );
        if let Some(ref tz) = self.flow_store.timezone {
            ensure!(
                !tz.is_empty() && !tz.contains(char::is_whitespace),
                "flow_store.timezone must be a zone name like \"Europe/Amsterdam\", got {:?}",
                tz
            );
        }
        validate_sink_address(&self.sink.address)?;
        ensure!(
            self.sink.deadline_secs > 0,
            "sink.deadline_secs must be > 0, got {}",
            self.sink.deadline_secs
        );
        ensure!(
            self.run.window_secs > 0,
            "run.window_secs must be > 0, got {}",
            self.run.window_secs
        );
        ensure!(
            self.run.interval_secs > 0,
            "run.interval_secs must be > 0, got {}",
            self.run.interval_secs
        );
        if let Some(ref expr) = self.run.schedule {
            ensure!(
                cron::Schedule::from_str(expr).is_ok(),
                "run.schedule is not a valid cron expression: {}",
                expr
            );
        }
        ensure!(!self.registry.url.is_empty(), "registry.url must be non-empty");
        ensure!(
            self.registry.timeout_secs > 0,
            "registry.timeout_secs must be > 0, got {}",
            self.registry.timeout_secs
        );

        ensure!(!self.policies.is_empty(), "at least one policy is required");
        let mut names = HashSet::new();
        for p in &self.policies {
            validate_policy(p)?;
            ensure!(
                names.insert(p.name.as_str()),
                "policy name '{}' is used more than once",
                p.name
            );
        }
        Ok(())
    }
}

fn validate_sink_address(address: &str) -> Result<(), ConfigurationError> {
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ConfigurationError::Invalid(format!(
            "sink.address must be host:port, got {address:?}"
        )));
    };
    ensure!(!host.is_empty(), "sink.address host must be non-empty, got {:?}", address);
    let port: u16 = port.parse().map_err(|_| {
        ConfigurationError::Invalid(format!("sink.address port is not a number: {address:?}"))
    })?;
    ensure!(port > 0, "sink.address port must be between 1 and 65535, got {}", port);
    Ok(())
}

fn validate_policy(p: &AggregationPolicy) -> Result<(), ConfigurationError> {
    ensure!(!p.name.is_empty(), "policy.name must be non-empty");
    ensure!(
        p.limit > 0,
        "policy '{}': limit must be > 0, got {}",
        p.name,
        p.limit
    );
    for placeholder in p.metric.placeholders() {
        ensure!(
            placeholder.applies_to(p.group_by),
            "policy '{}': metric placeholder {} is not available when grouping by {}",
            p.name,
            placeholder,
            p.group_by
        );
    }
    if p.missing_label == MissingLabel::Sentinel {
        ensure!(
            p.group_by == GroupBy::Port,
            "policy '{}': missing_label = \"sentinel\" only applies to port policies",
            p.name
        );
        ensure!(
            !p.sentinel.is_empty() && p.sentinel.bytes().all(|b| b.is_ascii_graphic()),
            "policy '{}': sentinel must be a non-empty ASCII token, got {:?}",
            p.name,
            p.sentinel
        );
    }
    Ok(())
}
