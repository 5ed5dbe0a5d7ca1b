//! Block difficulty.

use std::fmt;
use std::ops::{Add, Sub};

/// Work target for a single block.
///
/// Difficulty doubles as a block's score contribution; the chain score is
/// the running sum of committed difficulties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Difficulty(pub u64);

impl Difficulty {
    /// The lowest difficulty any block may carry.
    pub const MIN: Self = Self(1_000);

    /// Raw value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Clamp into the valid difficulty range.
    pub fn clamped(self) -> Self {
        Self(self.0.max(Self::MIN.0))
    }
}

impl Add for Difficulty {
    type Output = Difficulty;

    fn add(self, rhs: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Difficulty {
    type Output = Difficulty;

    fn sub(self, rhs: Difficulty) -> Difficulty {
        Difficulty(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
