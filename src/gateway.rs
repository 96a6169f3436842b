//! Narrow interface between the decision engine and the chain.
//!
//! The controller only ever talks to a [`ChainGateway`]. The JSON-RPC
//! implementation lives in [`crate::rpc`]; tests drive the engine through
//! scripted implementations.

use crate::queue::{BatchCall, MessageOrigin, RawQueueEntry, RecoveryAction, RecoveryTarget};
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};

pub type GatewayFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Reference to a newly imported block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>, parent_hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: hash.into(),
            parent_hash: parent_hash.into(),
        }
    }
}

/// Dispatch events emitted by one included batch extrinsic, in chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// `Utility::ItemCompleted`.
    ItemCompleted,
    /// `Utility::ItemFailed`.
    ItemFailed { error: String },
    /// `System::ExtrinsicSuccess`.
    ExtrinsicSuccess,
    /// `System::ExtrinsicFailed`; the whole batch call failed.
    ExtrinsicFailed { error: String },
    Other {
        pallet: String,
        variant: String,
        data: String,
    },
}

/// Progress of a submitted extrinsic as reported by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock {
        block_hash: String,
        events: Vec<DispatchEvent>,
    },
    Retracted {
        block_hash: String,
    },
    FinalityTimeout {
        block_hash: String,
    },
    Finalized {
        block_hash: String,
    },
    Usurped {
        tx_hash: String,
    },
    Dropped,
    Invalid,
}

impl TxStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Future => "future",
            TxStatus::Ready => "ready",
            TxStatus::Broadcast(_) => "broadcast",
            TxStatus::InBlock { .. } => "in_block",
            TxStatus::Retracted { .. } => "retracted",
            TxStatus::FinalityTimeout { .. } => "finality_timeout",
            TxStatus::Finalized { .. } => "finalized",
            TxStatus::Usurped { .. } => "usurped",
            TxStatus::Dropped => "dropped",
            TxStatus::Invalid => "invalid",
        }
    }
}

/// Cancellable, non-restartable sequence of notifications.
///
/// Dropping the subscription (or calling [`EventSubscription::unsubscribe`])
/// releases the underlying RPC subscription.
pub struct EventSubscription<T> {
    label: &'static str,
    stream: BoxStream<'static, Result<T>>,
}

pub type BlockSubscription = EventSubscription<BlockRef>;
pub type StatusSubscription = EventSubscription<TxStatus>;

impl<T> EventSubscription<T> {
    pub fn new(label: &'static str, stream: BoxStream<'static, Result<T>>) -> Self {
        Self { label, stream }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Next notification; `None` once the source has closed the subscription.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.stream.next().await
    }

    pub fn unsubscribe(self) {
        tracing::debug!(subscription = self.label, "releasing subscription");
        drop(self.stream);
    }
}

impl<T> std::fmt::Debug for EventSubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Builds encoded calls. Pure; never touches the network.
pub trait CallBuilder: Send + Sync {
    fn build_recovery_call(&self, target: RecoveryTarget) -> Result<RecoveryAction>;

    fn build_batch_call(&self, actions: &[RecoveryAction]) -> Result<BatchCall>;
}

/// Everything the agent needs from a chain connection.
pub trait ChainGateway: CallBuilder + 'static {
    fn subscribe_new_blocks(&self) -> GatewayFuture<'_, BlockSubscription>;

    /// Origin currently being serviced by the chain itself, if any.
    fn query_service_head(&self) -> GatewayFuture<'_, Option<MessageOrigin>>;

    /// All `MessageQueue::Pages` entries, in storage iteration order.
    fn query_queue_pages(&self) -> GatewayFuture<'_, Vec<RawQueueEntry>>;

    /// Signs and submits `call`, returning its status updates.
    fn submit_and_track<'a>(&'a self, call: &'a BatchCall) -> GatewayFuture<'a, StatusSubscription>;

    fn disconnect(&self) -> GatewayFuture<'_, ()>;
}
