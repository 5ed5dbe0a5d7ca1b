//! Dispatcher inputs.

use crate::ElementId;
use estuary_types::{
    AnnotatedBlockRange, AnnotatedTransactionRange, BlockElement, InputSource, NodeId,
    TransactionElement,
};
use std::fmt;

/// The entities carried by an input.
#[derive(Debug)]
enum Payload {
    Blocks(Vec<BlockElement>),
    Transactions(Vec<TransactionElement>),
}

/// A batch of blocks or transactions owned by a dispatcher slot.
///
/// Consumers borrow the input for the duration of their work and may mutate
/// the carried elements (filling hashes, attaching addresses, dropping
/// invalid transactions); the slot ownership rules in the dispatcher
/// guarantee at most one borrower at a time.
#[derive(Debug)]
pub struct ConsumerInput {
    payload: Payload,
    source: InputSource,
    source_id: Option<NodeId>,
    element_id: ElementId,
}

impl ConsumerInput {
    /// Build an input from an annotated block range.
    ///
    /// Entity hashes start zeroed; the hash-calculator consumer fills them.
    pub fn from_block_range(range: AnnotatedBlockRange) -> Self {
        let elements = range.blocks.into_iter().map(BlockElement::unhashed).collect();
        Self {
            payload: Payload::Blocks(elements),
            source: range.source,
            source_id: range.source_id,
            element_id: 0,
        }
    }

    /// Build an input from an annotated transaction range.
    pub fn from_transaction_range(range: AnnotatedTransactionRange) -> Self {
        let elements = range
            .transactions
            .into_iter()
            .map(TransactionElement::unhashed)
            .collect();
        Self {
            payload: Payload::Transactions(elements),
            source: range.source,
            source_id: range.source_id,
            element_id: 0,
        }
    }

    /// Whether the input carries no entities.
    pub fn is_empty(&self) -> bool {
        match &self.payload {
            Payload::Blocks(elements) => elements.is_empty(),
            Payload::Transactions(elements) => elements.is_empty(),
        }
    }

    /// Whether the input carries blocks.
    pub fn has_blocks(&self) -> bool {
        matches!(self.payload, Payload::Blocks(_))
    }

    /// The block elements; empty for transaction inputs.
    pub fn blocks(&self) -> &[BlockElement] {
        match &self.payload {
            Payload::Blocks(elements) => elements,
            Payload::Transactions(_) => &[],
        }
    }

    /// Mutable block elements; empty for transaction inputs.
    pub fn blocks_mut(&mut self) -> &mut [BlockElement] {
        match &mut self.payload {
            Payload::Blocks(elements) => elements,
            Payload::Transactions(_) => &mut [],
        }
    }

    /// The transaction elements; empty for block inputs.
    pub fn transactions(&self) -> &[TransactionElement] {
        match &self.payload {
            Payload::Transactions(elements) => elements,
            Payload::Blocks(_) => &[],
        }
    }

    /// Mutable access to the transaction element vector, allowing the
    /// stateless-validation consumer to drop failed transactions.
    ///
    /// # Panics
    ///
    /// Panics when called on a block input; the transaction consumers only
    /// ever run inside the transaction dispatcher.
    pub fn transactions_vec_mut(&mut self) -> &mut Vec<TransactionElement> {
        match &mut self.payload {
            Payload::Transactions(elements) => elements,
            Payload::Blocks(_) => panic!("block input in transaction pipeline"),
        }
    }

    /// Mutable transaction elements; empty for block inputs.
    pub fn transactions_mut(&mut self) -> &mut [TransactionElement] {
        match &mut self.payload {
            Payload::Transactions(elements) => elements,
            Payload::Blocks(_) => &mut [],
        }
    }

    /// Provenance of the input.
    pub fn source(&self) -> InputSource {
        self.source
    }

    /// Originating peer, when received remotely.
    pub fn source_id(&self) -> Option<NodeId> {
        self.source_id
    }

    /// Dispatcher-assigned element id; 0 until submitted.
    pub fn element_id(&self) -> ElementId {
        self.element_id
    }

    pub(crate) fn set_element_id(&mut self, id: ElementId) {
        self.element_id = id;
    }
}

impl fmt::Display for ConsumerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Payload::Blocks(elements) => {
                write!(f, "{} blocks from {}", elements.len(), self.source)
            }
            Payload::Transactions(elements) => {
                write!(f, "{} transactions from {}", elements.len(), self.source)
            }
        }
    }
}
