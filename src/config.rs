//! Configuration for the hub client

use std::env;
use std::time::Duration;

use serde::Deserialize;

/// Hub client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Hub HTTP endpoint, e.g. `https://socket.example.com/signalr`
    pub url: String,

    /// Hub name used in negotiation and invocations
    pub hub: String,

    /// Keep-alive probe interval
    pub keepalive_interval_ms: u64,

    /// How long an invocation may wait for its result
    pub invoke_timeout_ms: u64,

    /// How long connect/subscribe may wait for the connection to come up
    pub connect_timeout_ms: u64,

    /// Reconnect backoff base delay
    pub reconnect_delay_ms: u64,

    /// Reconnect backoff cap
    pub reconnect_delay_max_ms: u64,

    /// Random jitter added to each reconnect delay
    pub reconnect_jitter_ms: u64,

    /// Pause between invocations while replaying subscriptions
    pub replay_invoke_delay_ms: u64,
}

impl HubConfig {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            url: env::var("HUB_URL")
                .unwrap_or_else(|_| "https://socket-v3.bittrex.com/signalr".to_string()),
            hub: env::var("HUB_NAME").unwrap_or_else(|_| "c3".to_string()),
            keepalive_interval_ms: env_u64("HUB_KEEPALIVE_INTERVAL_MS", 5_000),
            invoke_timeout_ms: env_u64("HUB_INVOKE_TIMEOUT_MS", 30_000),
            connect_timeout_ms: env_u64("HUB_CONNECT_TIMEOUT_MS", 30_000),
            reconnect_delay_ms: env_u64("HUB_RECONNECT_DELAY_MS", 5_000),
            reconnect_delay_max_ms: env_u64("HUB_RECONNECT_DELAY_MAX_MS", 60_000),
            reconnect_jitter_ms: env_u64("HUB_RECONNECT_JITTER_MS", 250),
            replay_invoke_delay_ms: env_u64("HUB_REPLAY_INVOKE_DELAY_MS", 100),
        })
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_delay_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_max_ms)
    }

    pub fn replay_invoke_delay(&self) -> Duration {
        Duration::from_millis(self.replay_invoke_delay_ms)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            url: "https://socket-v3.bittrex.com/signalr".to_string(),
            hub: "c3".to_string(),
            keepalive_interval_ms: 5_000,
            invoke_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            reconnect_delay_ms: 5_000,
            reconnect_delay_max_ms: 60_000,
            reconnect_jitter_ms: 250,
            replay_invoke_delay_ms: 100,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
