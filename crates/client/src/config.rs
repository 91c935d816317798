//! Sync configuration from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::sync::SubscribeOptions;

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Settings for the live-data core, owned by the application root.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Base URL of the REST API server.
    pub api_url: String,
    /// WebSocket endpoint for push channels. `None` means poll only.
    pub push_url: Option<String>,
    /// Bearer token sent with API and push requests.
    pub api_token: Option<String>,
    /// Interval between resource poller refreshes.
    pub poll_interval: Duration,
    /// Delay between a poller's first fetch and the start of its poll loop.
    pub poll_grace: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub fallback_to_polling: bool,
    /// How long an endpoint stays marked absent after a 404.
    pub capability_ttl: Duration,
    /// Maximum entries kept in the transaction feed.
    pub transaction_limit: usize,
    /// Sampling interval of the connection status view.
    pub status_sample_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: None,
            api_token: None,
            poll_interval: Duration::from_secs(30),
            poll_grace: Duration::from_secs(2),
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            fallback_to_polling: true,
            capability_ttl: Duration::from_secs(60 * 60),
            transaction_limit: 50,
            status_sample_interval: Duration::from_secs(5),
        }
    }
}

impl SyncConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHAMA_API_URL`: API base URL (default: "http://localhost:5000/api")
    /// - `CHAMA_PUSH_URL`: WebSocket URL for push channels (default: unset, poll only)
    /// - `CHAMA_API_TOKEN`: bearer token (default: unset)
    /// - `CHAMA_POLL_INTERVAL_MS` (default: 30000)
    /// - `CHAMA_POLL_GRACE_MS` (default: 2000)
    /// - `CHAMA_MAX_RETRIES` (default: 3)
    /// - `CHAMA_RETRY_DELAY_MS` (default: 2000)
    /// - `CHAMA_FALLBACK_TO_POLLING`: "true" | "false" (default: "true")
    /// - `CHAMA_CAPABILITY_TTL_SECS` (default: 3600)
    /// - `CHAMA_TRANSACTION_LIMIT` (default: 50)
    /// - `CHAMA_STATUS_SAMPLE_MS` (default: 5000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SyncConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };

        Self {
            api_url: text("CHAMA_API_URL").unwrap_or(defaults.api_url),
            push_url: text("CHAMA_PUSH_URL"),
            api_token: text("CHAMA_API_TOKEN"),
            poll_interval: millis("CHAMA_POLL_INTERVAL_MS", defaults.poll_interval),
            poll_grace: millis("CHAMA_POLL_GRACE_MS", defaults.poll_grace),
            max_retries: parse_or(&lookup, "CHAMA_MAX_RETRIES", defaults.max_retries),
            retry_delay: millis("CHAMA_RETRY_DELAY_MS", defaults.retry_delay),
            fallback_to_polling: parse_or(
                &lookup,
                "CHAMA_FALLBACK_TO_POLLING",
                defaults.fallback_to_polling,
            ),
            capability_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CHAMA_CAPABILITY_TTL_SECS",
                defaults.capability_ttl.as_secs(),
            )),
            transaction_limit: parse_or(
                &lookup,
                "CHAMA_TRANSACTION_LIMIT",
                defaults.transaction_limit,
            ),
            status_sample_interval: millis(
                "CHAMA_STATUS_SAMPLE_MS",
                defaults.status_sample_interval,
            ),
        }
    }

    /// Subscription options for resource pollers built from this config.
    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay.as_millis() as u64,
            fallback_to_polling: self.fallback_to_polling,
            polling_interval_ms: self.poll_interval.as_millis() as u64,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, ?default, "invalid config value, using default");
            default
        }
    }
}
