//! Client-side selection strategies over discovered instance lists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::DiscoveryError;

/// Strategy for picking one index out of `len` candidates.
///
/// Implementations never see the candidates themselves, only how many there
/// are. [`select`] guards the empty case, so `pick` is only ever called with
/// `len >= 1` and must return an index below `len`.
pub trait Selector: Send + Sync {
    fn pick(&self, len: usize) -> usize;
}

/// Picks one element of `items` using `selector`.
///
/// An empty slice is rejected rather than panicking, and out-of-range picks
/// from a misbehaving strategy clamp to the last element.
pub fn select<'a, T>(selector: &dyn Selector, items: &'a [T]) -> Result<&'a T, DiscoveryError> {
    if items.is_empty() {
        return Err(DiscoveryError::InvalidArgument(
            "cannot select from an empty instance list".to_string(),
        ));
    }
    let index = selector.pick(items.len()).min(items.len() - 1);
    Ok(&items[index])
}

/// Uniform random selection.
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seeded variant with a reproducible pick sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for Random {
    fn pick(&self, len: usize) -> usize {
        self.rng.lock().expect("lock poisoned").gen_range(0..len)
    }
}

/// Strict rotation over indices: `0, 1, .., len - 1, 0, ..`.
///
/// The cursor is a single shared counter, so the rotation stays fair across
/// concurrent callers, and it carries over modulo the new length when the
/// candidate list grows or shrinks between picks.
pub struct RoundRobin {
    cursor: AtomicU64,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            cursor: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for RoundRobin {
    fn pick(&self, len: usize) -> usize {
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        (turn % len as u64) as usize
    }
}
