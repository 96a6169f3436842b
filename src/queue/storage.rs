//! Storage key derivation for the pallet items the agent reads.
//!
//! Substrate storage keys are built from `twox128(pallet) ++ twox128(item)`
//! followed by the hashed map keys. `MessageQueue::Pages` uses
//! `Twox64Concat` for both of its keys, which keeps the raw origin and page
//! index recoverable from the key itself.

use crate::queue::origin::MessageOrigin;
use codec::Encode;
use xxhash_rust::xxh64::xxh64;

pub const MESSAGE_QUEUE_PALLET: &str = "MessageQueue";
pub const SYSTEM_PALLET: &str = "System";

/// Length of the `twox128(pallet) ++ twox128(item)` prefix.
pub const STORAGE_PREFIX_LEN: usize = 32;
/// Length of the hash part of a `Twox64Concat` key.
pub const TWOX64_LEN: usize = 8;

pub fn twox_64(data: &[u8]) -> [u8; 8] {
    xxh64(data, 0).to_le_bytes()
}

pub fn twox_128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&xxh64(data, 0).to_le_bytes());
    out[8..].copy_from_slice(&xxh64(data, 1).to_le_bytes());
    out
}

pub fn twox_64_concat(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TWOX64_LEN + data.len());
    out.extend_from_slice(&twox_64(data));
    out.extend_from_slice(data);
    out
}

pub fn storage_prefix(pallet: &str, item: &str) -> [u8; STORAGE_PREFIX_LEN] {
    let mut out = [0u8; STORAGE_PREFIX_LEN];
    out[..16].copy_from_slice(&twox_128(pallet.as_bytes()));
    out[16..].copy_from_slice(&twox_128(item.as_bytes()));
    out
}

pub fn service_head_key() -> [u8; STORAGE_PREFIX_LEN] {
    storage_prefix(MESSAGE_QUEUE_PALLET, "ServiceHead")
}

pub fn pages_prefix() -> [u8; STORAGE_PREFIX_LEN] {
    storage_prefix(MESSAGE_QUEUE_PALLET, "Pages")
}

pub fn system_events_key() -> [u8; STORAGE_PREFIX_LEN] {
    storage_prefix(SYSTEM_PALLET, "Events")
}

/// Full `MessageQueue::Pages` key for one page.
pub fn page_key(origin: &MessageOrigin, page_index: u32) -> Vec<u8> {
    let mut key = pages_prefix().to_vec();
    key.extend(twox_64_concat(&origin.encode()));
    key.extend(twox_64_concat(&page_index.encode()));
    key
}

/// `0x`-prefixed lowercase hex, the form every Substrate RPC expects.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let trimmed = value.trim();
    hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
}
