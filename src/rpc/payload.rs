//! JSON shapes of the Substrate RPC responses and notifications the gateway
//! consumes.

use crate::gateway::{BlockRef, TxStatus};
use anyhow::{Context, Result};
use serde::Deserialize;

/// `chain_subscribeNewHeads` notification; only the fields the agent uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcHeader {
    pub(crate) parent_hash: String,
    pub(crate) number: String,
}

impl RpcHeader {
    pub(crate) fn block_number(&self) -> Result<u64> {
        parse_hex_number(&self.number)
            .with_context(|| format!("invalid block number {:?} in header", self.number))
    }

    /// Pairs the header with its own hash, which notifications do not carry.
    pub(crate) fn to_block_ref(&self, hash: impl Into<String>) -> Result<BlockRef> {
        Ok(BlockRef::new(
            self.block_number()?,
            hash,
            self.parent_hash.clone(),
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcRuntimeVersion {
    pub(crate) spec_version: u32,
    pub(crate) transaction_version: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcSignedBlock {
    pub(crate) block: RpcBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcBlock {
    pub(crate) extrinsics: Vec<String>,
}

impl RpcBlock {
    /// Position of `extrinsic_hex` among the block's extrinsics.
    pub(crate) fn extrinsic_index(&self, extrinsic_hex: &str) -> Option<u32> {
        self.extrinsics
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(extrinsic_hex))
            .and_then(|index| u32::try_from(index).ok())
    }
}

/// One entry of a `state_queryStorageAt` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RpcStorageChangeSet {
    pub(crate) changes: Vec<(String, Option<String>)>,
}

/// `author_submitAndWatchExtrinsic` notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum RpcTransactionStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(String),
    Retracted(String),
    FinalityTimeout(String),
    Finalized(String),
    Usurped(String),
    Dropped,
    Invalid,
}

impl RpcTransactionStatus {
    /// Converts to the gateway status. `InBlock` carries no events here; the
    /// gateway attaches them after reading the block.
    pub(crate) fn into_status(self) -> TxStatus {
        match self {
            RpcTransactionStatus::Future => TxStatus::Future,
            RpcTransactionStatus::Ready => TxStatus::Ready,
            RpcTransactionStatus::Broadcast(peers) => TxStatus::Broadcast(peers),
            RpcTransactionStatus::InBlock(block_hash) => TxStatus::InBlock {
                block_hash,
                events: Vec::new(),
            },
            RpcTransactionStatus::Retracted(block_hash) => TxStatus::Retracted { block_hash },
            RpcTransactionStatus::FinalityTimeout(block_hash) => {
                TxStatus::FinalityTimeout { block_hash }
            }
            RpcTransactionStatus::Finalized(block_hash) => TxStatus::Finalized { block_hash },
            RpcTransactionStatus::Usurped(tx_hash) => TxStatus::Usurped { tx_hash },
            RpcTransactionStatus::Dropped => TxStatus::Dropped,
            RpcTransactionStatus::Invalid => TxStatus::Invalid,
        }
    }
}

pub(crate) fn parse_hex_number(value: &str) -> Result<u64> {
    let digits = value.trim().trim_start_matches("0x");
    Ok(u64::from_str_radix(digits, 16)?)
}

pub(crate) fn parse_hash(value: &str) -> Result<[u8; 32]> {
    let bytes = crate::queue::storage::from_hex(value)
        .with_context(|| format!("invalid hash hex {value:?}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| anyhow::anyhow!("expected 32-byte hash, got {} bytes", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_yields_block_ref() {
        let header: RpcHeader = serde_json::from_value(json!({
            "parentHash": "0xaa",
            "number": "0x1b4",
            "stateRoot": "0x00",
            "extrinsicsRoot": "0x00",
            "digest": { "logs": [] }
        }))
        .unwrap();

        assert_eq!(header.block_number().unwrap(), 436);
        assert_eq!(
            header.to_block_ref("0xbb").unwrap(),
            BlockRef::new(436, "0xbb", "0xaa")
        );
    }

    #[test]
    fn malformed_block_number_is_an_error() {
        let header = RpcHeader {
            parent_hash: "0x00".into(),
            number: "0x".into(),
        };
        assert!(header.to_block_ref("0x01").is_err());
    }

    #[test]
    fn decodes_every_status_shape() {
        let cases = vec![
            (json!("future"), TxStatus::Future),
            (json!("ready"), TxStatus::Ready),
            (
                json!({ "broadcast": ["peer-a"] }),
                TxStatus::Broadcast(vec!["peer-a".into()]),
            ),
            (
                json!({ "inBlock": "0x01" }),
                TxStatus::InBlock {
                    block_hash: "0x01".into(),
                    events: Vec::new(),
                },
            ),
            (
                json!({ "retracted": "0x01" }),
                TxStatus::Retracted {
                    block_hash: "0x01".into(),
                },
            ),
            (
                json!({ "finalityTimeout": "0x02" }),
                TxStatus::FinalityTimeout {
                    block_hash: "0x02".into(),
                },
            ),
            (
                json!({ "finalized": "0x03" }),
                TxStatus::Finalized {
                    block_hash: "0x03".into(),
                },
            ),
            (
                json!({ "usurped": "0x04" }),
                TxStatus::Usurped {
                    tx_hash: "0x04".into(),
                },
            ),
            (json!("dropped"), TxStatus::Dropped),
            (json!("invalid"), TxStatus::Invalid),
        ];

        for (raw, expected) in cases {
            let status: RpcTransactionStatus = serde_json::from_value(raw.clone())
                .unwrap_or_else(|err| panic!("{raw} should decode: {err}"));
            assert_eq!(status.into_status(), expected);
        }
    }

    #[test]
    fn finds_extrinsic_position_case_insensitively() {
        let signed: RpcSignedBlock = serde_json::from_value(json!({
            "block": {
                "header": { "parentHash": "0x00", "number": "0x1" },
                "extrinsics": ["0x280402000b", "0xABCDEF", "0x1234"]
            },
            "justifications": null
        }))
        .unwrap();

        assert_eq!(signed.block.extrinsic_index("0xabcdef"), Some(1));
        assert_eq!(signed.block.extrinsic_index("0x99"), None);
    }

    #[test]
    fn change_sets_keep_missing_values() {
        let sets: Vec<RpcStorageChangeSet> = serde_json::from_value(json!([
            { "block": "0x01", "changes": [["0xaa", "0x0100"], ["0xbb", null]] }
        ]))
        .unwrap();

        assert_eq!(sets[0].changes.len(), 2);
        assert_eq!(sets[0].changes[1], ("0xbb".to_string(), None));
    }

    #[test]
    fn parses_hashes() {
        let hash = format!("0x{}", "11".repeat(32));
        assert_eq!(parse_hash(&hash).unwrap(), [0x11; 32]);
        assert!(parse_hash("0x1111").is_err());
    }
}
