//! Random integer source for jittered backoff.
//!
//! The default generator draws from `rand`'s thread-local RNG, which is a CSPRNG seeded from the
//! OS. [`SeededRandom`] gives reproducible sequences for tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Uniform integer generator over an inclusive range.
pub trait RandomGenerator: Send + Sync + std::fmt::Debug {
    /// Uniform integer in `[min, max]`. Returns `min` when `min >= max`.
    fn integer(&self, min: u64, max: u64) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomGenerator for ThreadRandom {
    fn integer(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        rand::rng().random_range(min..=max)
    }
}

/// Deterministic generator seeded from a `u64`.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl RandomGenerator for SeededRandom {
    fn integer(&self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).random_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_stays_in_inclusive_range() {
        let rng = ThreadRandom;
        for _ in 0..1000 {
            let v = rng.integer(3, 7);
            assert!((3..=7).contains(&v));
        }
    }

    #[test]
    fn degenerate_range_returns_min() {
        assert_eq!(ThreadRandom.integer(5, 5), 5);
        assert_eq!(SeededRandom::new(1).integer(9, 2), 9);
    }

    #[test]
    fn seeded_generators_repeat() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let xs: Vec<u64> = (0..16).map(|_| a.integer(0, 1_000)).collect();
        let ys: Vec<u64> = (0..16).map(|_| b.integer(0, 1_000)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn both_bounds_are_reachable() {
        let rng = SeededRandom::new(7);
        let draws: Vec<u64> = (0..500).map(|_| rng.integer(0, 1)).collect();
        assert!(draws.contains(&0));
        assert!(draws.contains(&1));
    }
}
