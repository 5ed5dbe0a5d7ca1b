//! The node's local chain score.

use estuary_types::{ChainScore, ScoreDelta};
use parking_lot::RwLock;

/// Shared holder of the local cumulative chain score.
///
/// Mutated only by the sync state-change handler; everything else reads.
#[derive(Debug, Default)]
pub struct LocalChainScore {
    score: RwLock<ChainScore>,
}

impl LocalChainScore {
    /// Start at the given score.
    pub fn new(score: ChainScore) -> Self {
        Self {
            score: RwLock::new(score),
        }
    }

    /// Current score.
    pub fn get(&self) -> ChainScore {
        *self.score.read()
    }

    /// Apply a signed delta, returning the new score.
    pub fn apply(&self, delta: ScoreDelta) -> ChainScore {
        let mut score = self.score.write();
        *score = score.apply(delta);
        *score
    }
}
