//! Domain model for the `MessageQueue` pallet as observed by the agent:
//! message origins, queue pages, recovery actions, and the storage key
//! layout used to read them.

pub mod action;
pub mod origin;
pub mod page;
pub mod storage;

pub use action::{BatchCall, Fingerprint, RecoveryAction, RecoveryTarget, WeightLimit};
pub use origin::MessageOrigin;
pub use page::{load_pages, DecodeError, QueuePage, RawQueueEntry};
