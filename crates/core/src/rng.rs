// crates/core/src/rng.rs
//! Seedable random source shared by the engine, the bus and the connector.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::MillisRange;

/// Cloneable handle to one `StdRng`.
///
/// Every timing and outcome draw goes through here so a fixed seed makes a
/// run reproducible.
#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rng)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rng mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }

    /// Uniform draw from `[min, max]` milliseconds.
    pub fn delay(&self, range: MillisRange) -> Duration {
        if range.min_ms >= range.max_ms {
            return Duration::from_millis(range.min_ms);
        }
        Duration::from_millis(self.with(|rng| rng.gen_range(range.min_ms..=range.max_ms)))
    }

    /// Uniform draw from `[min, max)`; returns `min` for an empty range.
    pub fn uniform(&self, min: f64, max: f64) -> f64 {
        if min >= max {
            return min;
        }
        self.with(|rng| rng.gen_range(min..max))
    }

    /// `true` with probability `p`, clamped to `[0, 1]`.
    pub fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.with(|rng| rng.gen_bool(p))
    }

    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        self.with(|rng| items.choose(rng))
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRng").finish_non_exhaustive()
    }
}
