use std::time::Duration;

use clap::Parser;

use crate::{logging::sink::DEFAULT_CAPACITY, manager::task_manager::ManagerConfig};

/// Runtime settings; every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "relay_sender", version, about = "Interactive console for background message relay tasks")]
pub struct Config {
    /// Base URL of the messaging endpoint.
    #[arg(long, env = "RELAY_ENDPOINT_URL", default_value = "http://127.0.0.1:8080")]
    pub endpoint_url: String,

    /// Timeout for a single remote call, in seconds.
    #[arg(long, env = "RELAY_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// How long a stop waits for a task to exit, in seconds.
    #[arg(long, env = "RELAY_STOP_TIMEOUT", default_value_t = 5)]
    pub stop_timeout_secs: u64,

    /// Interval used when a start request gives none (or an unreadable one).
    #[arg(long, env = "RELAY_DEFAULT_INTERVAL", default_value_t = 5.0)]
    pub default_interval_secs: f64,

    /// Number of console lines kept in memory.
    #[arg(long, env = "RELAY_LOG_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub log_capacity: usize,

    /// How often live viewers poll for new lines, in milliseconds.
    #[arg(long, env = "RELAY_STREAM_POLL_MS", default_value_t = 500)]
    pub stream_poll_ms: u64,

    /// Label prepended to every outbound message.
    #[arg(long, env = "RELAY_MESSAGE_PREFIX", default_value = "")]
    pub message_prefix: String,
}

impl Config {
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            message_prefix: self.message_prefix.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn default_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.default_interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_ms.max(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::try_parse_from(["relay_sender"]).unwrap();
        assert_eq!(config.log_capacity, 500);
        assert_eq!(config.default_interval(), Duration::from_secs(5));
        assert_eq!(config.manager_config().stop_timeout, Duration::from_secs(5));
        assert_eq!(config.stream_poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "relay_sender",
            "--endpoint-url",
            "http://relay.local",
            "--default-interval-secs",
            "0",
            "--message-prefix",
            "Bot:",
            "--stream-poll-ms",
            "1",
        ])
        .unwrap();
        assert_eq!(config.endpoint_url, "http://relay.local");
        assert_eq!(config.default_interval(), Duration::from_secs(5));
        assert_eq!(config.manager_config().message_prefix, "Bot:");
        assert_eq!(config.stream_poll_interval(), Duration::from_millis(10));
    }
}
