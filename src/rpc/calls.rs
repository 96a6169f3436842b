//! SCALE encoding of `MessageQueue::execute_overweight` and
//! `Utility::force_batch` calls.

use crate::gateway::CallBuilder;
use crate::queue::{BatchCall, RecoveryAction, RecoveryTarget};
use anyhow::{bail, Result};
use codec::{Compact, Encode};

pub const DEFAULT_MESSAGE_QUEUE_PALLET_INDEX: u8 = 35;
pub const DEFAULT_EXECUTE_OVERWEIGHT_CALL_INDEX: u8 = 1;
pub const DEFAULT_UTILITY_PALLET_INDEX: u8 = 40;
pub const DEFAULT_FORCE_BATCH_CALL_INDEX: u8 = 4;

/// Pallet and call indices of the target runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallIndices {
    pub message_queue_pallet: u8,
    pub execute_overweight: u8,
    pub utility_pallet: u8,
    pub force_batch: u8,
}

impl Default for CallIndices {
    fn default() -> Self {
        Self {
            message_queue_pallet: DEFAULT_MESSAGE_QUEUE_PALLET_INDEX,
            execute_overweight: DEFAULT_EXECUTE_OVERWEIGHT_CALL_INDEX,
            utility_pallet: DEFAULT_UTILITY_PALLET_INDEX,
            force_batch: DEFAULT_FORCE_BATCH_CALL_INDEX,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleCallBuilder {
    indices: CallIndices,
}

impl ScaleCallBuilder {
    pub fn new(indices: CallIndices) -> Self {
        Self { indices }
    }

    pub fn indices(&self) -> CallIndices {
        self.indices
    }
}

impl CallBuilder for ScaleCallBuilder {
    fn build_recovery_call(&self, target: RecoveryTarget) -> Result<RecoveryAction> {
        let mut encoded = vec![
            self.indices.message_queue_pallet,
            self.indices.execute_overweight,
        ];
        target.origin.encode_to(&mut encoded);
        target.page_index.encode_to(&mut encoded);
        target.sub_index.encode_to(&mut encoded);
        target.weight_limit.encode_to(&mut encoded);
        Ok(RecoveryAction::new(target, encoded))
    }

    fn build_batch_call(&self, actions: &[RecoveryAction]) -> Result<BatchCall> {
        if actions.is_empty() {
            bail!("cannot build a batch call without recovery actions");
        }
        let Ok(count) = u32::try_from(actions.len()) else {
            bail!("too many recovery actions for one batch: {}", actions.len());
        };

        let body_len: usize = actions.iter().map(|action| action.encoded().len()).sum();
        let mut encoded = Vec::with_capacity(2 + 5 + body_len);
        encoded.push(self.indices.utility_pallet);
        encoded.push(self.indices.force_batch);
        Compact(count).encode_to(&mut encoded);
        for action in actions {
            encoded.extend_from_slice(action.encoded());
        }

        Ok(BatchCall::new(encoded, actions.len()))
    }
}
