//! Append-only block storage.
//!
//! [`BlockStorage`] is the contract the chain-sync consumer commits through:
//! load blocks, append new ones at the tail, and drop everything above a
//! height when switching to a better fork. [`MemoryBlockStorage`] is the
//! in-memory reference implementation; persistent backends implement the
//! same trait.

mod memory;

pub use memory::MemoryBlockStorage;

use estuary_types::{BlockElement, Height};
use thiserror::Error;

/// Errors from block storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("no block stored at height {0}")]
    BlockNotFound(Height),

    #[error("cannot save block at height {actual}, chain is at {tail}")]
    HeightGap {
        /// Current tail height.
        tail: Height,
        /// Height of the rejected block.
        actual: Height,
    },

    #[error("block at height {0} does not link to its parent")]
    NotLinked(Height),

    #[error("cannot drop the nemesis block")]
    CannotDropNemesis,
}

/// Append-only block store.
///
/// Implementations are internally synchronized; the chain-sync consumer is
/// the only writer.
pub trait BlockStorage: Send + Sync {
    /// Height of the chain tail.
    fn chain_height(&self) -> Height;

    /// Load the block element stored at a height.
    fn load_block_element(&self, height: Height) -> Result<BlockElement, StorageError>;

    /// Load all stored block elements strictly above a height, ascending.
    fn load_block_elements_above(&self, height: Height)
        -> Result<Vec<BlockElement>, StorageError>;

    /// Append a block element at the chain tail.
    ///
    /// The element must sit at `chain_height() + 1` and link to the current
    /// tail block by parent hash.
    fn save_block_element(&self, element: &BlockElement) -> Result<(), StorageError>;

    /// Drop every block strictly above a height.
    fn drop_blocks_after(&self, height: Height) -> Result<(), StorageError>;
}
