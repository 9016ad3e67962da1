//! Seedable random source for explicit IVs.
//!
//! When a seed is set via [`ConfigBuilder::rng_seed`](crate::ConfigBuilder::rng_seed),
//! output is deterministic. This is only meant for tests.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Random number generator that can be seeded for deterministic behavior.
///
/// Without a seed it defers to the thread-local CSPRNG.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    /// Fill a slice, e.g. an explicit CBC IV.
    pub fn fill(&mut self, dest: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(dest),
            None => rand::thread_rng().fill_bytes(dest),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededRng")
            .field("seeded", &self.inner.is_some())
            .finish()
    }
}
