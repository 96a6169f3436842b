use crate::queue::origin::MessageOrigin;
use crate::queue::page::QueuePage;
use crate::queue::storage::to_hex;
use codec::{Decode, Encode};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_REF_TIME: u64 = 1_000_000_000;
pub const DEFAULT_PROOF_SIZE: u64 = 100_000;

/// Weight ceiling handed to every `execute_overweight` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct WeightLimit {
    #[codec(compact)]
    pub ref_time: u64,
    #[codec(compact)]
    pub proof_size: u64,
}

impl WeightLimit {
    pub fn new(ref_time: u64, proof_size: u64) -> Self {
        Self {
            ref_time,
            proof_size,
        }
    }
}

impl Default for WeightLimit {
    fn default() -> Self {
        Self::new(DEFAULT_REF_TIME, DEFAULT_PROOF_SIZE)
    }
}

/// Arguments of a single forced execution: which page, which item in it,
/// and how much weight it may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecoveryTarget {
    pub origin: MessageOrigin,
    pub page_index: u32,
    pub sub_index: u32,
    pub weight_limit: WeightLimit,
}

impl RecoveryTarget {
    /// Targets the first item of `page`.
    pub fn for_page(page: &QueuePage, weight_limit: WeightLimit) -> Self {
        Self {
            origin: page.origin,
            page_index: page.page_index,
            sub_index: 0,
            weight_limit,
        }
    }
}

/// Canonical identity of an encoded call: its `0x`-prefixed hex encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(encoded: &[u8]) -> Self {
        Self(to_hex(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An unsubmitted recovery call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryAction {
    target: RecoveryTarget,
    encoded: Arc<[u8]>,
    fingerprint: Fingerprint,
}

impl RecoveryAction {
    pub fn new(target: RecoveryTarget, encoded: Vec<u8>) -> Self {
        let fingerprint = Fingerprint::of(&encoded);
        Self {
            target,
            encoded: Arc::from(encoded),
            fingerprint,
        }
    }

    pub fn target(&self) -> &RecoveryTarget {
        &self.target
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// A batch call wrapping one or more recovery actions, ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCall {
    encoded: Vec<u8>,
    items: usize,
}

impl BatchCall {
    pub fn new(encoded: Vec<u8>, items: usize) -> Self {
        Self { encoded, items }
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn items(&self) -> usize {
        self.items
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.encoded)
    }
}
