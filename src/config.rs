//! Tracker configuration from environment variables

use crate::tracker::RetryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Sqlite,
    /// Dry runs only: history is capped and lost on exit
    Memory,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub feed_uri: String,
    pub chain_name: String,
    pub snapshot_interval: Duration,
    pub ping_interval: Duration,
    /// Time allowed after connecting for the first node announcement
    pub no_new_node_timeout: Duration,
    pub location_retry: RetryPolicy,
    pub db_path: String,
    pub backend: BackendType,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

const DEFAULT_FEED_URI: &str = "wss://telemetry.joystream.org/feed/";
const DEFAULT_CHAIN_NAME: &str = "Joystream";

impl TrackerConfig {
    /// Load configuration from the process environment (and `.env`)
    ///
    /// Environment variables:
    /// - `WEBSOCKET_URI` (default: wss://telemetry.joystream.org/feed/)
    /// - `CHAIN_NAME` (default: Joystream)
    /// - `INTERVAL` snapshot interval in minutes (default: 5)
    /// - `PING_INTERVAL_MS` (default: 30000)
    /// - `NO_NEW_NODE_TIMEOUT_MS` (default: 30000)
    /// - `LOCATION_RETRY_DELAY_MS` (default: 1000)
    /// - `LOCATION_RETRY_ATTEMPTS` (default: 10)
    /// - `TRACKER_DB_PATH` (default: telemetry.db)
    /// - `TRACKER_BACKEND` sqlite | memory (default: sqlite)
    ///
    /// `RUST_LOG` is read by `logging::init_logging`, which must run first
    /// so fallback warnings are not lost.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let feed_uri = required_or(&var, "WEBSOCKET_URI", DEFAULT_FEED_URI)?;
        if !feed_uri.starts_with("ws://") && !feed_uri.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "WEBSOCKET_URI must start with ws:// or wss://".to_string(),
            ));
        }

        let chain_name = required_or(&var, "CHAIN_NAME", DEFAULT_CHAIN_NAME)?;

        let interval_minutes: u64 = parse_or(&var, "INTERVAL", 5);
        let ping_interval_ms: u64 = parse_or(&var, "PING_INTERVAL_MS", 30_000);
        let no_new_node_timeout_ms: u64 = parse_or(&var, "NO_NEW_NODE_TIMEOUT_MS", 30_000);

        for (name, value) in [
            ("INTERVAL", interval_minutes),
            ("PING_INTERVAL_MS", ping_interval_ms),
            ("NO_NEW_NODE_TIMEOUT_MS", no_new_node_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", name)));
            }
        }

        let defaults = RetryPolicy::default();
        let location_retry = RetryPolicy {
            delay: Duration::from_millis(parse_or(
                &var,
                "LOCATION_RETRY_DELAY_MS",
                defaults.delay.as_millis() as u64,
            )),
            max_attempts: parse_or(&var, "LOCATION_RETRY_ATTEMPTS", defaults.max_attempts),
        };

        let backend_str = var("TRACKER_BACKEND").unwrap_or_else(|| "sqlite".to_string());
        let backend = match backend_str.to_lowercase().as_str() {
            "sqlite" => BackendType::Sqlite,
            "memory" => BackendType::Memory,
            _ => {
                log::warn!("Invalid TRACKER_BACKEND '{}', defaulting to sqlite", backend_str);
                BackendType::Sqlite
            }
        };

        Ok(Self {
            feed_uri,
            chain_name,
            snapshot_interval: Duration::from_secs(interval_minutes * 60),
            ping_interval: Duration::from_millis(ping_interval_ms),
            no_new_node_timeout: Duration::from_millis(no_new_node_timeout_ms),
            location_retry,
            db_path: var("TRACKER_DB_PATH").unwrap_or_else(|| "telemetry.db".to_string()),
            backend,
        })
    }
}

/// Unset falls back to the default; set but blank is an error
fn required_or<F>(var: &F, key: &str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default.to_string()),
        Some(value) if value.trim().is_empty() => Err(ConfigError::MissingVariable(key.to_string())),
        Some(value) => Ok(value.trim().to_string()),
    }
}

fn parse_or<F, T>(var: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match var(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', defaulting to {}", key, raw, default);
            default
        }),
    }
}
