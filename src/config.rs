//! Client configuration, environment-driven with sensible defaults.

use crate::poller::PollPolicy;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the backtest backend.
    pub api_url: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Where the session token is persisted between CLI invocations.
    pub token_file: String,
    /// Shared backoff policy for polling and hydration retries.
    pub poll_policy: PollPolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let api_url = std::env::var("FLASHTEST_API_URL")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());

        let http_timeout_secs = std::env::var("FLASHTEST_HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let token_file = std::env::var("FLASHTEST_TOKEN_FILE")
            .unwrap_or_else(|_| "./.flashtest_token".to_string());

        let initial_delay_ms = std::env::var("FLASHTEST_POLL_INITIAL_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .unwrap_or(2000);

        let backoff_multiplier = std::env::var("FLASHTEST_POLL_MULTIPLIER")
            .unwrap_or_else(|_| "1.5".to_string())
            .parse()
            .unwrap_or(1.5);

        let max_delay_ms = std::env::var("FLASHTEST_POLL_MAX_MS")
            .unwrap_or_else(|_| "10000".to_string())
            .parse()
            .unwrap_or(10000);

        let retry_limit = std::env::var("FLASHTEST_POLL_RETRY_LIMIT")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        Ok(Self {
            api_url,
            http_timeout: Duration::from_secs(http_timeout_secs),
            token_file,
            poll_policy: PollPolicy {
                initial_delay: Duration::from_millis(initial_delay_ms),
                backoff_multiplier,
                max_delay: Duration::from_millis(max_delay_ms),
                retry_limit,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".to_string(),
            http_timeout: Duration::from_secs(30),
            token_file: "./.flashtest_token".to_string(),
            poll_policy: PollPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_policy() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.poll_policy.initial_delay, Duration::from_millis(2000));
        assert_eq!(config.poll_policy.backoff_multiplier, 1.5);
        assert_eq!(config.poll_policy.max_delay, Duration::from_millis(10000));
        assert_eq!(config.poll_policy.retry_limit, 3);
    }
}
