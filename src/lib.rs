pub mod gateway;
pub mod processor;
pub mod queue;
pub mod rpc;
pub mod runtime;

pub use gateway::{
    BlockRef, BlockSubscription, CallBuilder, ChainGateway, DispatchEvent, EventSubscription,
    GatewayFuture, StatusSubscription, TxStatus,
};
pub use processor::batch::BatchBuilder;
pub use processor::controller::{
    BlockError, BlockOutcome, Controller, ControllerSettings, ControllerStage,
};
pub use processor::outcome::{OutcomeSummary, OutcomeTracker, TrackOutcome};
pub use processor::state::{AgentState, ProcessingGuard};
pub use queue::{
    load_pages, BatchCall, DecodeError, Fingerprint, MessageOrigin, QueuePage, RawQueueEntry,
    RecoveryAction, RecoveryTarget, WeightLimit,
};
pub use rpc::circuit_breaker::{CircuitBreakerSnapshot, CircuitState, RpcCircuitBreaker};
pub use rpc::{CallIndices, RpcChainGateway, RpcError, RuntimeAdapter, ScaleCallBuilder, SigningContext};
pub use runtime::config::{AgentConfig, AgentConfigBuilder, AgentConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
