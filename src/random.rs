//! Seeding and randomized decisions.
//!
//! A training or evaluation run owns a single [`SeedSource`]: a mutex-guarded
//! deterministic engine that every worker draws its own seed from. Workers
//! never share their local engines, so the only cross-thread contention is
//! the one seed draw at construction time.

use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

/// A thread-safe source of seeds for worker-local random engines.
pub struct SeedSource {
    engine: Mutex<ChaCha12Rng>,
}

impl SeedSource {
    /// Creates a seed source with a fixed master seed. Runs constructed from
    /// the same master seed draw identical worker seeds in the same order.
    pub fn new(seed: u64) -> Self {
        Self {
            engine: Mutex::new(ChaCha12Rng::seed_from_u64(seed)),
        }
    }

    /// Creates a seed source seeded from operating system entropy.
    pub fn from_entropy() -> Self {
        Self {
            engine: Mutex::new(ChaCha12Rng::from_os_rng()),
        }
    }

    /// Draws the next worker seed.
    pub fn next_seed(&self) -> u64 {
        self.engine.lock().next_u64()
    }
}

/// A coin that comes up heads with probability `numerator / denominator`.
///
/// Used by the tree trainer to reservoir-sample the features considered at
/// each split.
pub struct WeightedCoin {
    engine: ChaCha12Rng,
}

impl WeightedCoin {
    /// Creates a coin with a local engine seeded from the given source.
    pub fn new(seeds: &SeedSource) -> Self {
        Self::with_seed(seeds.next_seed())
    }

    /// Creates a coin with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            engine: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    /// Returns true with probability `numerator / denominator`.
    ///
    /// `numerator` must not exceed `denominator`, and `denominator` must be
    /// positive.
    pub fn flip(&mut self, numerator: u32, denominator: u32) -> bool {
        debug_assert!(denominator > 0);
        debug_assert!(numerator <= denominator);
        if numerator == denominator {
            return true;
        }
        self.engine.random_range(1..=denominator) <= numerator
    }
}
