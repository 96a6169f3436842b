//! Retry loop with breaker gating, per-request timeouts and metrics, plus the
//! canned log messages each gateway operation reports with.

use crate::rpc::circuit_breaker::{CircuitBreakerError, CircuitState, RpcCircuitBreaker};
use crate::rpc::client::RpcError;
use crate::rpc::metrics::{RpcMetrics, RpcMetricsSnapshot};
use crate::rpc::options::RpcClientOptions;
use anyhow::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

macro_rules! log_with_retry_ctx {
    ($level:ident, $ctx:expr, $($rest:tt)*) => {{
        if let Some(at) = $ctx.at {
            tracing::$level!(method = $ctx.messages.method, at = at, $($rest)*);
        } else {
            tracing::$level!(method = $ctx.messages.method, $($rest)*);
        }
    }};
}

/// Logging labels and retry policy of one gateway operation.
#[derive(Clone, Copy)]
pub(crate) struct RetryMessages {
    pub(crate) method: &'static str,
    pub(crate) circuit_open: &'static str,
    pub(crate) retry: &'static str,
    pub(crate) exhausted: &'static str,
    /// Operations with side effects run exactly once.
    pub(crate) single_attempt: bool,
}

/// Context passed into [`RpcGuard::call`] so callers can attach the block
/// hash a query is pinned to and reuse consistent log messaging.
#[derive(Clone, Copy)]
pub(crate) struct RetryContext<'a> {
    at: Option<&'a str>,
    messages: &'a RetryMessages,
}

impl<'a> RetryContext<'a> {
    pub(crate) fn new(messages: &'a RetryMessages) -> Self {
        Self { at: None, messages }
    }

    pub(crate) fn at_block(messages: &'a RetryMessages, block_hash: &'a str) -> Self {
        Self {
            at: Some(block_hash),
            messages,
        }
    }

    fn method(&self) -> &'static str {
        self.messages.method
    }

    fn log_permit(&self, state: CircuitState) {
        log_with_retry_ctx!(trace, self, breaker_state = ?state, "circuit breaker permit acquired");
    }

    fn log_circuit_open(&self) {
        log_with_retry_ctx!(warn, self, "{}", self.messages.circuit_open);
    }

    fn log_success(&self, attempt: usize, latency: Duration) {
        log_with_retry_ctx!(
            debug,
            self,
            attempt,
            latency_ms = duration_to_millis(latency),
            "rpc call completed"
        );
    }

    fn log_retry(&self, attempt: usize, backoff: Duration, err: &Error, timeout: bool) {
        log_with_retry_ctx!(
            warn,
            self,
            attempt,
            backoff_ms = duration_to_millis(backoff),
            error = %err,
            timeout,
            "{}",
            self.messages.retry
        );
    }

    fn log_exhausted(&self, attempt: usize, err: &Error, timeout: bool) {
        log_with_retry_ctx!(
            error,
            self,
            attempt,
            error = %err,
            timeout,
            "{}",
            self.messages.exhausted
        );
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}

/// Options, metrics and breaker shared by every request of one gateway.
#[derive(Debug, Clone)]
pub(crate) struct RpcGuard {
    options: RpcClientOptions,
    metrics: Arc<RpcMetrics>,
    breaker: Arc<RpcCircuitBreaker>,
}

impl RpcGuard {
    pub(crate) fn new(options: RpcClientOptions, breaker: Arc<RpcCircuitBreaker>) -> Self {
        Self {
            options,
            metrics: Arc::new(RpcMetrics::default()),
            breaker,
        }
    }

    pub(crate) fn options(&self) -> &RpcClientOptions {
        &self.options
    }

    pub(crate) fn record_submission(&self) {
        self.metrics.record_submission();
    }

    pub(crate) fn metrics(&self) -> RpcMetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot().state)
    }

    /// Runs `operation` under the breaker with a per-attempt timeout,
    /// retrying failures with exponential backoff. A lost connection is
    /// never retried here.
    pub(crate) async fn call<T, F, Fut>(&self, context: RetryContext<'_>, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = if context.messages.single_attempt {
            1
        } else {
            self.options.max_attempts
        };
        let mut attempt = 0;

        loop {
            match self.breaker.before_request() {
                Ok(state) => context.log_permit(state),
                Err(CircuitBreakerError::CircuitOpen) => {
                    context.log_circuit_open();
                    return Err(RpcError::CircuitOpen.into());
                }
            }

            attempt += 1;
            let start = Instant::now();

            let result = match timeout(self.options.request_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(RpcError::Timeout {
                    method: context.method(),
                }
                .into()),
            };

            let err = match result {
                Ok(value) => {
                    let latency = start.elapsed();
                    self.metrics.record_success(latency);
                    self.breaker.record_success();
                    context.log_success(attempt, latency);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = start.elapsed();
            let rpc_error = err.downcast_ref::<RpcError>();
            let timed_out = matches!(rpc_error, Some(RpcError::Timeout { .. }));
            if timed_out {
                self.metrics.record_timeout(elapsed);
            } else {
                self.metrics.record_failure(elapsed);
            }
            self.breaker.record_failure();

            if matches!(rpc_error, Some(RpcError::Disconnected)) || attempt >= max_attempts {
                context.log_exhausted(attempt, &err, timed_out);
                return Err(err);
            }

            let backoff = self.options.backoff_delay(attempt);
            context.log_retry(attempt, backoff, &err, timed_out);
            sleep(backoff).await;
        }
    }
}

pub(crate) const SUBSCRIBE_HEADS_RETRY: RetryMessages = RetryMessages {
    method: "chain_subscribeNewHeads",
    circuit_open: "RPC circuit breaker open; cannot subscribe to new heads",
    retry: "new head subscription failed; retrying",
    exhausted: "new head subscription exhausted retries",
    single_attempt: false,
};

pub(crate) const SERVICE_HEAD_RETRY: RetryMessages = RetryMessages {
    method: "state_getStorage",
    circuit_open: "RPC circuit breaker open; rejecting service head query",
    retry: "service head query failed; retrying",
    exhausted: "service head query exhausted retries",
    single_attempt: false,
};

pub(crate) const HEAD_HASH_RETRY: RetryMessages = RetryMessages {
    method: "chain_getBlockHash",
    circuit_open: "RPC circuit breaker open; cannot resolve new head hash",
    retry: "new head hash query failed; retrying",
    exhausted: "new head hash query exhausted retries",
    single_attempt: false,
};

pub(crate) const BEST_HASH_RETRY: RetryMessages = RetryMessages {
    method: "chain_getBlockHash",
    circuit_open: "RPC circuit breaker open; rejecting block hash query",
    retry: "block hash query failed; retrying",
    exhausted: "block hash query exhausted retries",
    single_attempt: false,
};

pub(crate) const PAGE_KEYS_RETRY: RetryMessages = RetryMessages {
    method: "state_getKeysPaged",
    circuit_open: "RPC circuit breaker open; rejecting queue page key scan",
    retry: "queue page key scan failed; retrying",
    exhausted: "queue page key scan exhausted retries",
    single_attempt: false,
};

pub(crate) const PAGE_VALUES_RETRY: RetryMessages = RetryMessages {
    method: "state_queryStorageAt",
    circuit_open: "RPC circuit breaker open; rejecting queue page query",
    retry: "queue page query failed; retrying",
    exhausted: "queue page query exhausted retries",
    single_attempt: false,
};

pub(crate) const SIGNING_CONTEXT_RETRY: RetryMessages = RetryMessages {
    method: "system_accountNextIndex",
    circuit_open: "RPC circuit breaker open; cannot prepare signing context",
    retry: "signing context query failed; retrying",
    exhausted: "signing context query exhausted retries",
    single_attempt: false,
};

pub(crate) const RUNTIME_VERSION_RETRY: RetryMessages = RetryMessages {
    method: "state_getRuntimeVersion",
    circuit_open: "RPC circuit breaker open; cannot read runtime version",
    retry: "runtime version query failed; retrying",
    exhausted: "runtime version query exhausted retries",
    single_attempt: false,
};

pub(crate) const SUBMIT_RETRY: RetryMessages = RetryMessages {
    method: "author_submitAndWatchExtrinsic",
    circuit_open: "RPC circuit breaker open; rejecting extrinsic submission",
    retry: "extrinsic submission failed",
    exhausted: "extrinsic submission failed",
    single_attempt: true,
};

pub(crate) const INCLUSION_RETRY: RetryMessages = RetryMessages {
    method: "chain_getBlock",
    circuit_open: "RPC circuit breaker open; cannot fetch inclusion events",
    retry: "inclusion event query failed; retrying",
    exhausted: "inclusion event query exhausted retries",
    single_attempt: false,
};
