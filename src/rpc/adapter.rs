//! Runtime-specific pieces the gateway cannot derive on its own: the signer
//! and the event decoder.

use crate::gateway::DispatchEvent;
use crate::queue::BatchCall;
use anyhow::Result;

/// Chain data a signer needs to produce a valid extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub nonce: u64,
    pub genesis_hash: [u8; 32],
    pub spec_version: u32,
    pub transaction_version: u32,
}

/// Implemented by downstream crates that know the target runtime's
/// signature scheme, signed extensions, and event layout.
pub trait RuntimeAdapter: Send + Sync + 'static {
    /// Signer account in a form accepted by `system_accountNextIndex`.
    fn account_id(&self) -> String;

    /// Returns the encoded extrinsic exactly as submitted to the pool,
    /// including its compact length prefix.
    fn sign_extrinsic(&self, call: &BatchCall, context: &SigningContext) -> Result<Vec<u8>>;

    /// Decodes the `System.Events` value of a block and returns the events
    /// emitted by extrinsic `extrinsic_index`, in chain order.
    fn decode_dispatch_events(
        &self,
        raw_events: &[u8],
        extrinsic_index: u32,
    ) -> Result<Vec<DispatchEvent>>;
}
