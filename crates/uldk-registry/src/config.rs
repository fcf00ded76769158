use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RateLimiter;

pub const DEFAULT_BASE_URL: &str = "https://uldk.gugik.gov.pl/";
pub const BASE_URL_ENV: &str = "ULDK_BASE_URL";

/// Connection and rate-limit settings for registry clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry endpoint
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Calls allowed per window
    pub max_calls: usize,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            max_calls: 5,
            window_ms: 3_000,
        }
    }
}

impl RegistryConfig {
    /// Apply the `ULDK_BASE_URL` override, if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BASE_URL_ENV)
            && !url.trim().is_empty()
        {
            self.base_url = url;
        }
        self
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// A fresh limiter with this config's budget.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.max_calls, self.window())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_registry_budget() {
        let config = RegistryConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        let limiter = config.rate_limiter();
        assert_eq!(limiter.max_calls(), 5);
        assert_eq!(limiter.window(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"timeout_secs": 5}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.max_calls, 5);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }
}
