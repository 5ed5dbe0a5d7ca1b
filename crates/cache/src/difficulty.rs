//! Block-difficulty sub-cache.

use estuary_types::{Difficulty, Height, Timestamp};

/// Difficulty record for one committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyInfo {
    /// Block height.
    pub height: Height,
    /// Block timestamp.
    pub timestamp: Timestamp,
    /// Difficulty the block was harvested at.
    pub difficulty: Difficulty,
}

/// The most recent committed difficulty records, height ordered.
///
/// Retains enough history to recompute expected difficulties for the full
/// rollback window; older records are pruned on insert.
#[derive(Debug, Clone)]
pub struct BlockDifficultyCache {
    infos: im::OrdMap<u64, DifficultyInfo>,
    retention: usize,
}

impl BlockDifficultyCache {
    /// An empty cache retaining at most `retention` records.
    pub fn new(retention: usize) -> Self {
        Self {
            infos: im::OrdMap::new(),
            retention: retention.max(1),
        }
    }

    /// Record a committed block, pruning history beyond the retention limit.
    pub fn insert(&mut self, info: DifficultyInfo) {
        self.infos.insert(info.height.0, info);
        while self.infos.len() > self.retention {
            if let Some((oldest, _)) = self.infos.get_min().map(|(k, v)| (*k, *v)) {
                self.infos.remove(&oldest);
            }
        }
    }

    /// Drop all records above the given height; used when undoing a suffix.
    pub fn remove_above(&mut self, height: Height) {
        let above: Vec<u64> = self
            .infos
            .keys()
            .copied()
            .filter(|h| *h > height.0)
            .collect();
        for h in above {
            self.infos.remove(&h);
        }
    }

    /// The record at a height, when still retained.
    pub fn get(&self, height: Height) -> Option<DifficultyInfo> {
        self.infos.get(&height.0).copied()
    }

    /// Up to `count` most recent records at or below `height`, ascending.
    pub fn recent_up_to(&self, height: Height, count: usize) -> Vec<DifficultyInfo> {
        let mut recent: Vec<DifficultyInfo> = self
            .infos
            .iter()
            .filter(|(h, _)| **h <= height.0)
            .map(|(_, info)| *info)
            .collect();
        if recent.len() > count {
            recent.drain(..recent.len() - count);
        }
        recent
    }

    /// Height of the newest record, when any.
    pub fn max_height(&self) -> Option<Height> {
        self.infos.get_max().map(|(h, _)| Height(*h))
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Whether no records are retained.
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(height: u64) -> DifficultyInfo {
        DifficultyInfo {
            height: Height(height),
            timestamp: Timestamp(height * 15_000),
            difficulty: Difficulty(1_000 + height),
        }
    }

    #[test]
    fn insert_prunes_beyond_retention() {
        let mut cache = BlockDifficultyCache::new(3);
        for h in 1..=5 {
            cache.insert(info(h));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get(Height(2)).is_none());
        assert_eq!(cache.get(Height(5)), Some(info(5)));
        assert_eq!(cache.max_height(), Some(Height(5)));
    }

    #[test]
    fn remove_above_unwinds_history() {
        let mut cache = BlockDifficultyCache::new(10);
        for h in 1..=5 {
            cache.insert(info(h));
        }
        cache.remove_above(Height(3));
        assert_eq!(cache.max_height(), Some(Height(3)));
        assert!(cache.get(Height(4)).is_none());
    }

    #[test]
    fn recent_up_to_returns_ascending_window() {
        let mut cache = BlockDifficultyCache::new(10);
        for h in 1..=6 {
            cache.insert(info(h));
        }
        let recent = cache.recent_up_to(Height(5), 3);
        let heights: Vec<u64> = recent.iter().map(|i| i.height.0).collect();
        assert_eq!(heights, vec![3, 4, 5]);
    }
}
