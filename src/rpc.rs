//! JSON-RPC gateway plumbing: call encoding, circuit breaker, metrics, retry
//! policy, wire payloads, and the WebSocket-backed [`RpcChainGateway`].

pub mod adapter;
pub mod calls;
pub mod circuit_breaker;
pub mod client;
pub mod metrics;
pub mod options;
pub mod payload;
pub mod retry;

pub use adapter::{RuntimeAdapter, SigningContext};
pub use calls::{CallIndices, ScaleCallBuilder};
pub use circuit_breaker::{
    CircuitBreakerError, CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker,
};
pub use client::{RpcChainGateway, RpcError};
pub use metrics::RpcMetricsSnapshot;
pub use options::RpcClientOptions;
