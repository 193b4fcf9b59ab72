//! Tower-height generation.
//!
//! Each insert draws a level from a per-map xorshift32 generator (Marsaglia,
//! "Xorshift RNGs"; the `13/17/5` variant). Not a high-quality generator,
//! but cheap and good enough for skip-list balance: the height is the count
//! of trailing one bits of the draw, so `P(level >= n) = 2^-n` with a hard
//! cap at [`MAX_LEVEL`].

use std::sync::atomic::AtomicU32;

use crate::ordering::RELAXED;

/// Hard cap on tower height. With `P(level >= n) = 2^-n` this is beyond
/// any reachable map size.
pub(crate) const MAX_LEVEL: usize = 31;

/// Per-map xorshift32 state.
///
/// Updates are relaxed and may race; a lost update repeats a draw, it
/// cannot bias the per-draw distribution.
pub(crate) struct LevelGenerator {
    seed: AtomicU32,
}

impl LevelGenerator {
    /// Generator seeded from the process-wide entropy source.
    pub(crate) fn from_entropy() -> Self {
        Self::with_seed(rand::random::<u32>())
    }

    /// Generator with a fixed seed, for reproducible tests.
    pub(crate) const fn with_seed(seed: u32) -> Self {
        // 0x100 keeps the xorshift state nonzero.
        Self {
            seed: AtomicU32::new(seed | 0x100),
        }
    }

    /// Draw the tower height for one insertion. Zero means no tower.
    pub(crate) fn random_level(&self) -> usize {
        let mut x = self.seed.load(RELAXED);
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed.store(x, RELAXED);
        (x.trailing_ones() as usize).min(MAX_LEVEL)
    }
}

// ============================================================================
//  Tests
// ============================================================================
