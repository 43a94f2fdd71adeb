//! Injectable randomness.
//!
//! Zone failover, search-winner selection and instance-name suffixes all
//! draw from one [`RandomSource`] handle so tests can seed it and make
//! every pick deterministic.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Cloneable, thread-safe RNG handle.
#[derive(Clone)]
pub struct RandomSource {
    inner: Arc<Mutex<StdRng>>,
}

impl RandomSource {
    /// Entropy-seeded source for production use.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Deterministic source for tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Uniformly random index into a collection of `len` elements.
    pub fn index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut rng = self.inner.lock().expect("rng poisoned");
        Some(rng.gen_range(0..len))
    }

    /// Uniformly random element of a slice.
    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        self.index(items.len()).map(|i| &items[i])
    }

    /// Lowercase alphanumeric suffix for generated resource names.
    pub fn suffix(&self, len: usize) -> String {
        let mut rng = self.inner.lock().expect("rng poisoned");
        (0..len)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}
