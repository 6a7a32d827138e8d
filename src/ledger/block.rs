//! Ledger block types and canonical hashing.
//!
//! A block wraps one batch operation. Hash chaining uses SHA-256 over a
//! canonical JSON encoding of the previous block: the block is first lifted
//! into a `serde_json::Value`, whose object maps are ordered (BTreeMap), so
//! keys serialize lexicographically sorted and numbers render through
//! serde_json's deterministic formatter. The same canonical form is used
//! everywhere block bytes are needed; the on-disk document is free to be
//! pretty-printed because hashing always re-canonicalizes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// `previous_hash` of the genesis block: 64 zero digits.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Role of a block in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockInfo {
    /// Synthesized once when a ledger file is first created.
    Genesis,
    /// Records one embed-batch operation.
    Embedder,
    /// Records one remove-batch operation.
    Remover,
}

/// Minimal chaining header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Wall-clock seconds since the Unix epoch at append time.
    pub timestamp: f64,
    /// SHA-256 of the canonical encoding of the previous block, 64 hex
    /// chars; all zeros for genesis.
    pub previous_hash: String,
    /// Position in the chain, starting at 0.
    pub block_number: u64,
}

/// One tamper-evident ledger entry.
///
/// The transaction payload stays a generic JSON value here; the typed
/// shapes live in [`crate::ledger::transaction`] and are lowered into JSON
/// by the batch drivers. Blocks are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub info: BlockInfo,
    pub transaction: Value,
}

impl Block {
    /// The genesis block: number 0, zero previous hash, empty transaction.
    pub fn genesis(timestamp: f64) -> Self {
        Self {
            header: BlockHeader {
                timestamp,
                previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
                block_number: 0,
            },
            info: BlockInfo::Genesis,
            transaction: Value::Object(serde_json::Map::new()),
        }
    }

    /// Canonical byte representation: JSON with sorted object keys.
    ///
    /// Hash chaining depends on these bytes being stable, so all hashing
    /// goes through this method.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error: every
    /// field is required to be serializable.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let value = serde_json::to_value(self).expect("block fields are serializable");
        serde_json::to_vec(&value).expect("JSON value encodes to bytes")
    }

    /// SHA-256 of the canonical encoding, as 64 lowercase hex chars.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn genesis_shape() {
        let genesis = Block::genesis(1_700_000_000.0);
        assert_eq!(genesis.header.block_number, 0);
        assert_eq!(genesis.header.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.info, BlockInfo::Genesis);
        assert_eq!(genesis.transaction, json!({}));
    }

    #[test]
    fn hash_is_deterministic() {
        let block = Block {
            header: BlockHeader {
                timestamp: 1_700_000_000.25,
                previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
                block_number: 1,
            },
            info: BlockInfo::Embedder,
            transaction: json!({"total_images": 2, "failed_images": []}),
        };
        assert_eq!(block.compute_hash(), block.compute_hash());
        assert_eq!(block.compute_hash().len(), 64);
    }

    #[test]
    fn canonical_encoding_sorts_keys() {
        let block = Block {
            header: BlockHeader {
                timestamp: 0.0,
                previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
                block_number: 1,
            },
            info: BlockInfo::Embedder,
            transaction: json!({"zebra": 1, "alpha": 2}),
        };
        let text = String::from_utf8(block.canonical_bytes()).unwrap();
        let alpha = text.find("alpha").unwrap();
        let zebra = text.find("zebra").unwrap();
        assert!(alpha < zebra);
        // Struct fields sort too: "header" before "info" before "transaction".
        assert!(text.find("header").unwrap() < text.find("info").unwrap());
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = Block::genesis(1.0);
        let mut other = base.clone();
        other.header.timestamp = 2.0;
        assert_ne!(base.compute_hash(), other.compute_hash());

        let mut other = base.clone();
        other.transaction = json!({"k": "v"});
        assert_ne!(base.compute_hash(), other.compute_hash());
    }
}
