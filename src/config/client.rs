//! Connection settings for one [`crate::client::N8nClient`].

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::http::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS, DEFAULT_MAX_RETRIES};

/// Shortest API key accepted.
pub const MIN_API_KEY_LEN: usize = 10;

/// Largest `max_retries` accepted.
pub const MAX_RETRIES_LIMIT: u32 = 10;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;

/// Immutable configuration of an API client.
#[derive(Clone, PartialEq)]
pub struct ClientConfig {
    /// Instance URL, e.g. `https://example.app.n8n.cloud`.
    pub base_url: String,
    pub api_key: String,
    /// Applied to each attempt separately.
    pub timeout: Duration,
    /// Attempts made after the first one.
    pub max_retries: u32,
    pub cache_ttl: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_concurrent_requests: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            retry_base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let base_url = self.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::validation(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.api_key.trim().len() < MIN_API_KEY_LEN {
            return Err(Error::validation(format!(
                "api_key must be at least {} characters",
                MIN_API_KEY_LEN
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::validation("timeout must be greater than zero"));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::validation(format!(
                "max_retries must be at most {}",
                MAX_RETRIES_LIMIT
            )));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(Error::validation(
                "retry_base_delay must not exceed retry_max_delay",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(Error::validation(
                "max_concurrent_requests must be at least 1",
            ));
        }
        Ok(())
    }

    /// Root of the public REST API on this instance.
    pub fn api_base(&self) -> String {
        format!("{}/api/v1", self.base_url.trim().trim_end_matches('/'))
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &mask_secret(&self.api_key))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("cache_ttl", &self.cache_ttl)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .finish()
    }
}

/// Keeps the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}
