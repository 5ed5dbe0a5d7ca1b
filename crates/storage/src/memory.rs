//! In-memory block store.

use crate::{BlockStorage, StorageError};
use estuary_types::{BlockElement, Height};
use im::OrdMap;
use parking_lot::RwLock;
use tracing::debug;

/// Block store backed by a persistent ordered map.
///
/// Seeded with a nemesis element at construction, so the chain height is
/// always at least the nemesis height.
pub struct MemoryBlockStorage {
    blocks: RwLock<OrdMap<u64, BlockElement>>,
}

impl MemoryBlockStorage {
    /// Create a store holding only the given nemesis element.
    pub fn new(nemesis: BlockElement) -> Self {
        let mut blocks = OrdMap::new();
        blocks.insert(nemesis.block.height.0, nemesis);
        Self {
            blocks: RwLock::new(blocks),
        }
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn chain_height(&self) -> Height {
        let blocks = self.blocks.read();
        Height(blocks.get_max().map(|(h, _)| *h).unwrap_or(0))
    }

    fn load_block_element(&self, height: Height) -> Result<BlockElement, StorageError> {
        self.blocks
            .read()
            .get(&height.0)
            .cloned()
            .ok_or(StorageError::BlockNotFound(height))
    }

    fn load_block_elements_above(
        &self,
        height: Height,
    ) -> Result<Vec<BlockElement>, StorageError> {
        let blocks = self.blocks.read();
        Ok(blocks
            .iter()
            .filter(|(h, _)| **h > height.0)
            .map(|(_, element)| element.clone())
            .collect())
    }

    fn save_block_element(&self, element: &BlockElement) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write();
        let tail_height = blocks.get_max().map(|(h, _)| *h).unwrap_or(0);
        let height = element.block.height;
        if height.0 != tail_height + 1 {
            return Err(StorageError::HeightGap {
                tail: Height(tail_height),
                actual: height,
            });
        }
        let tail = blocks
            .get(&tail_height)
            .ok_or(StorageError::BlockNotFound(Height(tail_height)))?;
        if element.block.previous_block_hash != tail.entity_hash {
            return Err(StorageError::NotLinked(height));
        }
        blocks.insert(height.0, element.clone());
        debug!(height = height.0, "block saved");
        Ok(())
    }

    fn drop_blocks_after(&self, height: Height) -> Result<(), StorageError> {
        let mut blocks = self.blocks.write();
        let min_height = blocks.get_min().map(|(h, _)| *h).unwrap_or(0);
        if height.0 < min_height {
            return Err(StorageError::CannotDropNemesis);
        }
        let above: Vec<u64> = blocks
            .keys()
            .copied()
            .filter(|h| *h > height.0)
            .collect();
        let dropped = above.len();
        for h in above {
            blocks.remove(&h);
        }
        if dropped > 0 {
            debug!(height = height.0, dropped, "dropped blocks above height");
        }
        Ok(())
    }
}
