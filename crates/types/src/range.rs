//! Entity ranges as they arrive from the network.

use crate::{Block, InputSource, NodeId, Transaction};
use std::fmt;
use std::sync::Arc;

/// Block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Height(pub u64);

impl Height {
    /// The next height.
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }

    /// The previous height, saturating at zero.
    pub fn prev(self) -> Height {
        Height(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous run of blocks annotated with its provenance.
#[derive(Debug, Clone)]
pub struct AnnotatedBlockRange {
    /// The blocks, in ascending height order.
    pub blocks: Vec<Arc<Block>>,
    /// Where the range came from.
    pub source: InputSource,
    /// Originating peer, when the range was received remotely.
    pub source_id: Option<NodeId>,
}

impl AnnotatedBlockRange {
    /// A range produced by this node.
    pub fn local(blocks: Vec<Arc<Block>>) -> Self {
        Self {
            blocks,
            source: InputSource::Local,
            source_id: None,
        }
    }

    /// A range received from a remote peer.
    pub fn remote(blocks: Vec<Arc<Block>>, source: InputSource, peer: NodeId) -> Self {
        Self {
            blocks,
            source,
            source_id: Some(peer),
        }
    }
}

/// A batch of transactions annotated with its provenance.
#[derive(Debug, Clone)]
pub struct AnnotatedTransactionRange {
    /// The transactions, in arrival order.
    pub transactions: Vec<Arc<Transaction>>,
    /// Where the range came from.
    pub source: InputSource,
    /// Originating peer, when the range was received remotely.
    pub source_id: Option<NodeId>,
}

impl AnnotatedTransactionRange {
    /// A range produced by this node.
    pub fn local(transactions: Vec<Arc<Transaction>>) -> Self {
        Self {
            transactions,
            source: InputSource::Local,
            source_id: None,
        }
    }

    /// A range received from a remote peer.
    pub fn remote(transactions: Vec<Arc<Transaction>>, source: InputSource, peer: NodeId) -> Self {
        Self {
            transactions,
            source,
            source_id: Some(peer),
        }
    }
}
