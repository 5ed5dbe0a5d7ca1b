//! Blocks.

use crate::{compute_merkle_root, Difficulty, Hash, Height, PublicKey, Timestamp, Transaction};
use std::sync::Arc;

/// A harvested block: header fields plus the transactions it confirms.
#[derive(Debug, Clone)]
pub struct Block {
    /// Position in the chain.
    pub height: Height,
    /// Network time at which the block was harvested.
    pub timestamp: Timestamp,
    /// Work target met by this block; also its score contribution.
    pub difficulty: Difficulty,
    /// Entity hash of the block at `height - 1`.
    pub previous_block_hash: Hash,
    /// Merkle root over the confirmed transaction hashes.
    pub transactions_hash: Hash,
    /// Public key of the harvesting account.
    pub harvester: PublicKey,
    /// Confirmed transactions, in block order.
    pub transactions: Vec<Arc<Transaction>>,
}

impl Block {
    /// Canonical header byte layout, used for hashing and auditing.
    ///
    /// The header commits to the transactions through `transactions_hash`,
    /// so transaction bytes are not repeated here.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8 + 8 + 8 + 32 + 32 + 32);
        bytes.extend_from_slice(&self.height.0.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.millis().to_le_bytes());
        bytes.extend_from_slice(&self.difficulty.value().to_le_bytes());
        bytes.extend_from_slice(self.previous_block_hash.as_bytes());
        bytes.extend_from_slice(self.transactions_hash.as_bytes());
        bytes.extend_from_slice(self.harvester.as_bytes());
        bytes
    }

    /// Entity hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.header_bytes())
    }

    /// Merkle root over the given transactions, as stored in a valid header.
    pub fn merkle_root(transactions: &[Arc<Transaction>]) -> Hash {
        let hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
        compute_merkle_root(&hashes)
    }
}
