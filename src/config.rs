//! Session configuration.
//!
//! Process-wide defaults live here as plain values; a session takes its own
//! copy at construction and nothing changes it afterwards.

use crate::base::neterror::NetError;
use crate::http::httpcache::CacheLimits;
use crate::http::retry::RetryConfig;
use crate::socket::pool::DEFAULT_MAX_IDLE_PER_HOST;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redirects followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Bodies with a known length below this are read eagerly. Same as the
/// upload chunk size.
pub const DEFAULT_BUFFER_THRESHOLD: usize = 8192;

pub fn default_user_agent() -> String {
    format!("couchnet/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base for relative request URLs.
    pub base_url: Option<String>,
    /// Bound on connect and on every socket read and write, in seconds.
    /// `None` waits forever.
    pub timeout_secs: Option<f64>,
    pub cache: CacheLimits,
    pub max_redirects: usize,
    pub retry: RetryConfig,
    pub user_agent: String,
    pub buffer_threshold: usize,
    pub max_idle_per_host: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: None,
            cache: CacheLimits::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry: RetryConfig::default(),
            user_agent: default_user_agent(),
            buffer_threshold: DEFAULT_BUFFER_THRESHOLD,
            max_idle_per_host: DEFAULT_MAX_IDLE_PER_HOST,
        }
    }
}

impl SessionConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|e| {
            tracing::debug!(error = %e, "invalid session config");
            NetError::JsonParseError
        })
    }

    /// The configured timeout. Non-positive or non-finite values mean none.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_cache_limits(mut self, cache: CacheLimits) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }
}
