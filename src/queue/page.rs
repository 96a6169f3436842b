//! Turns raw `MessageQueue::Pages` storage entries into [`QueuePage`]s.

use crate::queue::origin::MessageOrigin;
use crate::queue::storage::{pages_prefix, to_hex, TWOX64_LEN};
use codec::Decode;
use std::fmt;

/// Raw storage pair as returned by the chain: full key and SCALE value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawQueueEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl RawQueueEntry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One page of a message queue, identified by `(origin, page_index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePage {
    pub origin: MessageOrigin,
    pub page_index: u32,
    pub remaining: u32,
}

impl QueuePage {
    pub fn has_remaining(&self) -> bool {
        self.remaining > 0
    }
}

/// Leading fields of the on-chain `Page` struct. The heap that follows is
/// never needed by the agent and is left undecoded.
#[derive(Debug, Decode)]
struct PageHeader {
    remaining: u32,
    #[allow(dead_code)]
    remaining_size: u32,
    #[allow(dead_code)]
    first_index: u32,
    #[allow(dead_code)]
    first: u32,
    #[allow(dead_code)]
    last: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedPrefix { key: String },
    MalformedKey { key: String, reason: String },
    MalformedValue { key: String, reason: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedPrefix { key } => {
                write!(f, "storage key {key} is not a MessageQueue::Pages key")
            }
            DecodeError::MalformedKey { key, reason } => {
                write!(f, "failed to decode page key {key}: {reason}")
            }
            DecodeError::MalformedValue { key, reason } => {
                write!(f, "failed to decode page value at {key}: {reason}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes every entry, preserving order. A single malformed entry fails the
/// whole load.
pub fn load_pages(entries: &[RawQueueEntry]) -> Result<Vec<QueuePage>, DecodeError> {
    entries.iter().map(decode_entry).collect()
}

fn decode_entry(entry: &RawQueueEntry) -> Result<QueuePage, DecodeError> {
    let (origin, page_index) = decode_key(&entry.key)?;

    let mut value = entry.value.as_slice();
    let header = PageHeader::decode(&mut value).map_err(|err| DecodeError::MalformedValue {
        key: to_hex(&entry.key),
        reason: err.to_string(),
    })?;

    Ok(QueuePage {
        origin,
        page_index,
        remaining: header.remaining,
    })
}

fn decode_key(key: &[u8]) -> Result<(MessageOrigin, u32), DecodeError> {
    let malformed = |reason: &str| DecodeError::MalformedKey {
        key: to_hex(key),
        reason: reason.to_owned(),
    };

    let Some(rest) = key.strip_prefix(pages_prefix().as_slice()) else {
        return Err(DecodeError::UnexpectedPrefix { key: to_hex(key) });
    };

    let mut input = rest
        .get(TWOX64_LEN..)
        .ok_or_else(|| malformed("truncated origin hash"))?;
    let origin = MessageOrigin::decode(&mut input).map_err(|err| malformed(&err.to_string()))?;

    input = input
        .get(TWOX64_LEN..)
        .ok_or_else(|| malformed("truncated page index hash"))?;
    let page_index = u32::decode(&mut input).map_err(|err| malformed(&err.to_string()))?;

    if !input.is_empty() {
        return Err(malformed("trailing bytes after page index"));
    }

    Ok((origin, page_index))
}
