//! Seeded random number generator for deterministic simulation.
//!
//! This module provides a centralized RNG that can be shared across all
//! simulation components (network, adversaries, client) to ensure
//! deterministic behavior.

use parking_lot::Mutex;
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::SmallRng,
    Rng, SeedableRng,
};
use statrs::distribution::Poisson;
use std::sync::Arc;

/// A thread-safe, seeded random number generator for simulation.
///
/// All random decisions during simulation should go through this RNG
/// to ensure deterministic replay when using the same seed.
///
/// # Determinism
///
/// For deterministic replay:
/// 1. All random decisions must use this RNG
/// 2. Random calls must happen in the same order each run
/// 3. Parallel access must be serialized (handled internally by Mutex)
#[derive(Clone)]
pub struct SimulationRng {
    inner: Arc<Mutex<SmallRng>>,
    seed: u64,
}

impl SimulationRng {
    /// Creates a new simulation RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SmallRng::seed_from_u64(seed))),
            seed,
        }
    }

    /// Returns the seed used to create this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates a random boolean with the given probability of being true.
    ///
    /// The probability is clamped to `[0, 1]`.
    pub fn gen_bool(&self, probability: f64) -> bool {
        self.inner.lock().gen_bool(probability.clamp(0.0, 1.0))
    }

    /// Generates a random u64.
    pub fn gen_u64(&self) -> u64 {
        self.inner.lock().gen()
    }

    /// Generates a random usize in the given range.
    pub fn gen_range(&self, range: std::ops::Range<usize>) -> usize {
        self.inner.lock().gen_range(range)
    }

    /// Generates a random u64 in the given inclusive range.
    pub fn gen_range_inclusive_u64(&self, range: std::ops::RangeInclusive<u64>) -> u64 {
        self.inner.lock().gen_range(range)
    }

    /// Generates a random f64 in [0, 1).
    pub fn gen_f64(&self) -> f64 {
        self.inner.lock().gen()
    }

    /// Samples a Poisson-distributed count with the given mean.
    ///
    /// A non-positive (or non-finite) mean always yields zero.
    pub fn gen_poisson(&self, mean: f64) -> usize {
        let Ok(dist) = Poisson::new(mean) else {
            return 0;
        };
        let sample: f64 = dist.sample(&mut *self.inner.lock());
        sample as usize
    }

    /// Chooses a random element from a slice, returning None if empty.
    pub fn choose<'a, T>(&self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            return None;
        }
        let idx = self.gen_range(0..slice.len());
        Some(&slice[idx])
    }

    /// Chooses a random element with probability proportional to `weight`.
    ///
    /// Falls back to a uniform choice when every weight is zero.
    pub fn choose_weighted<'a, T, F>(&self, slice: &'a [T], weight: F) -> Option<&'a T>
    where
        F: Fn(&T) -> u64,
    {
        if slice.is_empty() {
            return None;
        }
        match WeightedIndex::new(slice.iter().map(&weight)) {
            Ok(dist) => {
                let idx = dist.sample(&mut *self.inner.lock());
                Some(&slice[idx])
            }
            Err(_) => self.choose(slice),
        }
    }

    /// Shuffles a slice in-place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&self, slice: &mut [T]) {
        let mut rng = self.inner.lock();
        for i in (1..slice.len()).rev() {
            let j = rng.gen_range(0..=i);
            slice.swap(i, j);
        }
    }

    /// Creates a child RNG with a specific derived seed based on an index.
    ///
    /// Child RNGs created this way are independent of request order, as long
    /// as the indices are consistent. Used to give the network, each
    /// adversary layer and the client their own stream.
    pub fn child_with_index(&self, index: u64) -> Self {
        // Derive seed by mixing parent seed with index
        let derived_seed = self
            .seed
            .wrapping_mul(0x517cc1b727220a95)
            .wrapping_add(index);
        Self::new(derived_seed)
    }
}

impl std::fmt::Debug for SimulationRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationRng")
            .field("seed", &self.seed)
            .finish()
    }
}
