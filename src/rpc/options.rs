//! Knobs for the WebSocket RPC client along with validation helpers covering
//! timeouts, retry/backoff limits, breaker thresholds, and storage paging.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_WS_MESSAGE_LIMIT_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_KEYS_PAGE_SIZE: u32 = 1_000;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;
const DEFAULT_BREAKER_THRESHOLD: usize = 5;
const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_message_bytes: usize,
    pub keys_page_size: u32,
    pub breaker_threshold: usize,
    pub breaker_cooldown: Duration,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            max_message_bytes: DEFAULT_WS_MESSAGE_LIMIT_BYTES,
            keys_page_size: DEFAULT_KEYS_PAGE_SIZE,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cooldown: Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
        }
    }
}

impl RpcClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be greater than 0");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.initial_backoff.is_zero() {
            bail!("initial_backoff must be greater than 0");
        }
        if self.max_backoff < self.initial_backoff {
            bail!("max_backoff must not be shorter than initial_backoff");
        }
        if self.max_message_bytes == 0 {
            bail!("max_message_bytes must be greater than 0");
        }
        if self.keys_page_size == 0 {
            bail!("keys_page_size must be greater than 0");
        }
        if self.breaker_threshold == 0 {
            bail!("breaker_threshold must be greater than 0");
        }
        Ok(())
    }

    /// Delay before retry number `attempt`, doubling from `initial_backoff`
    /// and capped at `max_backoff`.
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        if attempt <= 1 {
            return self.initial_backoff;
        }

        let exponent = attempt.saturating_sub(1) as u32;
        let multiplier = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }
}
