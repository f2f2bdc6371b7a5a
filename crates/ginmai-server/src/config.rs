//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ginmai_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./ginmai.db`
    pub database_path: PathBuf,

    /// How often expired moments are rewritten to `completed`.
    /// Env: `SWEEP_INTERVAL_SECS` (0 disables the sweep)
    /// Default: 60 seconds
    pub sweep_interval: Option<Duration>,

    /// Push gateway that receives notification payloads as JSON.
    /// Env: `PUSH_ENDPOINT`
    /// Default: unset (notifications are only logged).
    pub push_endpoint: Option<String>,

    /// Sustained requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"GinMai"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./ginmai.db"),
            sweep_interval: Some(Duration::from_secs(60)),
            push_endpoint: None,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup. Invalid values are logged
    /// and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr>(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(secs) = parsed::<u64>(&lookup, "SWEEP_INTERVAL_SECS") {
            config.sweep_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(endpoint) = lookup("PUSH_ENDPOINT").filter(|e| !e.trim().is_empty()) {
            config.push_endpoint = Some(endpoint);
        }

        if let Some(rate) = parsed::<f64>(&lookup, "RATE_LIMIT_PER_SEC").filter(|r| *r > 0.0) {
            config.rate_limit_per_sec = rate;
        }

        if let Some(burst) = parsed::<f64>(&lookup, "RATE_LIMIT_BURST").filter(|b| *b >= 1.0) {
            config.rate_limit_burst = burst;
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "invalid configuration value, using default");
            None
        }
    }
}
