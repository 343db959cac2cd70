//! Retry logic with exponential backoff.
//!
//! Based on Chromium's `HttpNetworkTransaction::RetryReason` enum and retry logic.
//! See: net/http/http_network_transaction.h
//!
//! Only failures that mean "the request never reached a live server" are
//! retried. Timeouts are not: a timed-out request must fail within its bound.

use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reasons for retrying a request (mirrors Chromium's RetryReason enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Server closed connection unexpectedly
    ConnectionReset,
    /// Connection was closed during request
    ConnectionClosed,
    /// Connection was aborted
    ConnectionAborted,
    /// Socket not connected
    SocketNotConnected,
    /// Empty response received
    EmptyResponse,
}

impl RetryReason {
    /// Map a NetError to a RetryReason, if the error is retryable.
    pub fn from_error(error: &NetError) -> Option<Self> {
        match error {
            NetError::ConnectionReset => Some(Self::ConnectionReset),
            NetError::ConnectionClosed => Some(Self::ConnectionClosed),
            NetError::ConnectionAborted => Some(Self::ConnectionAborted),
            NetError::SocketNotConnected => Some(Self::SocketNotConnected),
            NetError::EmptyResponse => Some(Self::EmptyResponse),
            _ => None,
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3, matching Chromium)
    pub max_attempts: usize,
    /// Base delay for exponential backoff in milliseconds (default: 100)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 5000)
    pub max_delay_ms: u64,
    /// Jitter factor (0.0-1.0) to randomize delays (default: 0.1)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Calculate backoff delay for a given attempt.
///
/// Uses exponential backoff: `base_delay * 2^attempt`
/// Capped at `max_delay_ms`.
pub fn calculate_backoff(attempt: usize, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    // Exponential: base * 2^(attempt-1)
    let delay_ms = config
        .base_delay_ms
        .saturating_mul(1 << (attempt - 1).min(10));
    let capped_ms = delay_ms.min(config.max_delay_ms);

    // Add jitter
    let jitter_range = (capped_ms as f64 * config.jitter_factor) as u64;
    let jittered_ms = if jitter_range > 0 {
        // Deterministic jitter based on attempt number
        let jitter = (attempt as u64 * 7) % jitter_range;
        capped_ms.saturating_add(jitter)
    } else {
        capped_ms
    };

    Duration::from_millis(jittered_ms)
}

/// Check if we should retry based on attempt count.
pub fn should_retry(attempt: usize, config: &RetryConfig) -> bool {
    attempt < config.max_attempts
}
