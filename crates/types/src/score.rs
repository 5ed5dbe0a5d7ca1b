//! Cumulative chain score.

use crate::Difficulty;
use std::fmt;

/// Cumulative difficulty score of a chain.
///
/// Wide enough that summing per-block difficulties can never overflow over
/// any realistic chain length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ChainScore(pub u128);

impl ChainScore {
    /// Raw value.
    pub fn value(&self) -> u128 {
        self.0
    }

    /// Score after committing a block of the given difficulty.
    pub fn with_block(self, difficulty: Difficulty) -> Self {
        Self(self.0 + u128::from(difficulty.value()))
    }

    /// Signed difference between two scores.
    pub fn delta_from(self, earlier: ChainScore) -> ScoreDelta {
        ScoreDelta(self.0 as i128 - earlier.0 as i128)
    }

    /// Apply a signed delta, saturating at zero.
    pub fn apply(self, delta: ScoreDelta) -> Self {
        let next = self.0 as i128 + delta.0;
        Self(next.max(0) as u128)
    }
}

impl fmt::Display for ChainScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed change in chain score produced by a sync commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ScoreDelta(pub i128);

impl ScoreDelta {
    /// Whether this delta increases the score.
    pub fn is_improvement(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ScoreDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+}", self.0)
    }
}
