use std::time::Duration;

use serde::{Deserialize, Serialize};

use ginmai_shared::constants::{DEFAULT_HTTP_PORT, REMINDER_LEAD_MINUTES, REMINDER_MIN_DELAY_SECS};

/// Where seat accounting is arbitrated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// The GinMai server enforces every invariant for all devices.
    #[default]
    Server,
    /// An on-device store. Best-effort only: nothing arbitrates between
    /// devices, so two phones can each believe they hold the last seat.
    LocalOnly,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the GinMai server, without a trailing slash.
    pub server_url: String,
    pub mode: BackendMode,
    /// Per-request deadline. A join that exceeds it is reconciled, not failed.
    pub request_timeout: Duration,
    /// How long before `starts_at` the reminder fires.
    pub reminder_lead: chrono::Duration,
    /// Reminders that would fire sooner than this are not scheduled.
    pub reminder_min_delay: chrono::Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            mode: BackendMode::Server,
            request_timeout: Duration::from_secs(10),
            reminder_lead: chrono::Duration::minutes(REMINDER_LEAD_MINUTES),
            reminder_min_delay: chrono::Duration::seconds(REMINDER_MIN_DELAY_SECS),
        }
    }
}

impl ClientConfig {
    pub fn server(url: impl Into<String>) -> Self {
        Self {
            server_url: url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    pub fn local_only() -> Self {
        Self {
            mode: BackendMode::LocalOnly,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_favour_server_mode() {
        let config = ClientConfig::default();
        assert_eq!(config.mode, BackendMode::Server);
        assert_eq!(config.reminder_lead, chrono::Duration::minutes(10));
        assert_eq!(config.reminder_min_delay, chrono::Duration::seconds(30));
    }

    #[test]
    fn test_server_url_is_normalised() {
        let config = ClientConfig::server("https://api.ginmai.app/");
        assert_eq!(config.server_url, "https://api.ginmai.app");
    }
}
