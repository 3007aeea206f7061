//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `8080`, `0` for auto-assign).
    pub port: u16,
    /// Per-connection outbound queue capacity.
    pub max_send_queue: usize,
    /// Heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds (close after silence this long).
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Build a config from the process environment.
    ///
    /// `PORT` selects the listen port; the remaining knobs read
    /// `SWITCHBOARD_*` variables. Unset or unparseable values fall back to
    /// the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("SWITCHBOARD_HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            max_send_queue: env_parse("SWITCHBOARD_MAX_SEND_QUEUE", defaults.max_send_queue),
            heartbeat_interval_secs: env_parse(
                "SWITCHBOARD_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            heartbeat_timeout_secs: env_parse(
                "SWITCHBOARD_HEARTBEAT_TIMEOUT_SECS",
                defaults.heartbeat_timeout_secs,
            ),
            max_message_size: env_parse("SWITCHBOARD_MAX_MESSAGE_SIZE", defaults.max_message_size),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
