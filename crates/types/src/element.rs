//! Hashed element wrappers.
//!
//! Raw ranges enter the pipelines as plain entities; the hash-calculator
//! consumers decorate them into elements carrying computed hashes, and the
//! optional address-extraction consumer adds resolved addresses. Elements are
//! mutated only while the owning dispatcher slot is held by a single
//! consumer.

use crate::{Address, Block, Hash, Timestamp, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A transaction plus its computed entity hash.
#[derive(Debug, Clone)]
pub struct TransactionElement {
    /// The parsed transaction.
    pub transaction: Arc<Transaction>,
    /// Blake3 entity hash, computed by the hash-calculator consumer.
    pub entity_hash: Hash,
    /// Addresses touched by the transaction, when precomputation is enabled.
    pub addresses: Option<BTreeSet<Address>>,
}

impl TransactionElement {
    /// Wrap a transaction, computing its hash.
    pub fn new(transaction: Arc<Transaction>) -> Self {
        let mut element = Self::unhashed(transaction);
        element.compute_hash();
        element
    }

    /// Wrap a transaction without computing its hash.
    ///
    /// Dispatcher inputs start unhashed; the hash-calculator consumer fills
    /// the hash in.
    pub fn unhashed(transaction: Arc<Transaction>) -> Self {
        Self {
            transaction,
            entity_hash: Hash::ZERO,
            addresses: None,
        }
    }

    /// Compute and record the entity hash.
    pub fn compute_hash(&mut self) {
        self.entity_hash = self.transaction.hash();
    }
}

/// A block plus its computed hash and hashed transactions.
#[derive(Debug, Clone)]
pub struct BlockElement {
    /// The parsed block.
    pub block: Arc<Block>,
    /// Blake3 entity hash of the block header.
    pub entity_hash: Hash,
    /// Elements for the confirmed transactions, in block order.
    pub transaction_elements: Vec<TransactionElement>,
}

impl BlockElement {
    /// Wrap a block, computing its hash and its transactions' hashes.
    pub fn new(block: Arc<Block>) -> Self {
        let mut element = Self::unhashed(block);
        element.compute_hashes();
        element
    }

    /// Wrap a block without computing any hashes.
    pub fn unhashed(block: Arc<Block>) -> Self {
        let transaction_elements = block
            .transactions
            .iter()
            .map(|tx| TransactionElement::unhashed(Arc::clone(tx)))
            .collect();
        Self {
            block,
            entity_hash: Hash::ZERO,
            transaction_elements,
        }
    }

    /// Compute and record the block hash and all transaction hashes.
    pub fn compute_hashes(&mut self) {
        self.entity_hash = self.block.hash();
        for element in &mut self.transaction_elements {
            element.compute_hash();
        }
    }
}

/// A detached copy of a transaction and its hash, as handed to sinks and the
/// unconfirmed-transaction pool.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// The transaction.
    pub transaction: Arc<Transaction>,
    /// Its entity hash.
    pub entity_hash: Hash,
    /// Network time at which the node first saw the transaction.
    pub seen_at: Timestamp,
}

impl TransactionInfo {
    /// Build an info from an element at the given observation time.
    pub fn from_element(element: &TransactionElement, seen_at: Timestamp) -> Self {
        Self {
            transaction: Arc::clone(&element.transaction),
            entity_hash: element.entity_hash,
            seen_at,
        }
    }
}
