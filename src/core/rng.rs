//! Deterministic Random Number Generator
//!
//! Mulberry32: a 32-bit Weyl counter followed by an avalanche mix. Tiny state,
//! fully determined by `(seed, draws)`, identical on every platform.
//!
//! The match RNG lives in an [`RngSlot`] owned by the simulation. Reading the
//! slot before a seed has been installed is an error, never a silent fallback
//! to platform randomness.

use serde::{Serialize, Deserialize};
use std::f64::consts::TAU;

use super::fixed::Fixed;
use super::vec2::FixedVec2;

/// Weyl increment for Mulberry32.
const WEYL_INCREMENT: u32 = 0x6D2B_79F5;

/// 2^32 as f64, maps a u32 draw onto [0, 1).
const U32_RANGE: f64 = 4_294_967_296.0;

/// Upper bound on rejection-sampling attempts before falling back to the centre.
const MAX_REJECTIONS: u32 = 64;

/// Deterministic PRNG using the Mulberry32 algorithm.
///
/// # Example
///
/// ```
/// use sol_lockstep::core::rng::DeterministicRng;
///
/// let mut rng = DeterministicRng::new(42);
/// assert_eq!(rng.next_u32(), 2581720956); // Always the same!
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    seed: u32,
    state: u32,
    draws: u64,
}

impl DeterministicRng {
    /// Create a new RNG from a 32-bit seed.
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed, draws: 0 }
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Number of draws taken so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Raw 32-bit state word (diagnostics only).
    pub fn state(&self) -> u32 {
        self.state
    }

    /// Generate the next 32-bit value. Every other draw goes through here.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(WEYL_INCREMENT);
        self.draws += 1;

        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Uniform value in `[0, 1)`.
    #[inline]
    pub fn next(&mut self) -> f64 {
        self.next_u32() as f64 / U32_RANGE
    }

    /// Uniform integer in `[min, max]` (inclusive). Returns `min` if `min >= max`.
    pub fn next_int(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let span = (max as i64) - (min as i64) + 1;
        let offset = (self.next() * span as f64) as i64;
        (min as i64 + offset.min(span - 1)) as i32
    }

    /// Uniform float in `[min, max)`.
    #[inline]
    pub fn next_float(&mut self, min: f64, max: f64) -> f64 {
        min + self.next() * (max - min)
    }

    /// `true` with the given probability.
    #[inline]
    pub fn next_bool(&mut self, probability: f64) -> bool {
        self.next() < probability
    }

    /// Uniform angle in radians, `[0, 2π)`.
    #[inline]
    pub fn next_angle(&mut self) -> f64 {
        self.next() * TAU
    }

    /// Uniform point inside the unit circle, by rejection sampling.
    pub fn next_in_unit_circle(&mut self) -> (f64, f64) {
        for _ in 0..MAX_REJECTIONS {
            let x = self.next_float(-1.0, 1.0);
            let y = self.next_float(-1.0, 1.0);
            if x * x + y * y <= 1.0 {
                return (x, y);
            }
        }
        (0.0, 0.0)
    }

    /// Uniform fixed-point value in `[min, max)`. Integer-only.
    pub fn next_fixed_range(&mut self, min: Fixed, max: Fixed) -> Fixed {
        if min >= max {
            return min;
        }
        let span = (max as i64) - (min as i64);
        let scaled = (self.next_u32() as i64 * span) >> 32;
        (min as i64 + scaled) as Fixed
    }

    /// Fixed-point offset inside a square of half-size `radius` around `center`.
    pub fn next_offset(&mut self, center: FixedVec2, radius: Fixed) -> FixedVec2 {
        let x = self.next_fixed_range(-radius, radius);
        let y = self.next_fixed_range(-radius, radius);
        center + FixedVec2::new(x, y)
    }

    /// Pick a uniformly random element.
    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.next_int(0, items.len() as i32 - 1) as usize;
        items.get(idx)
    }

    /// Shuffle in place (Fisher-Yates).
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_int(0, i as i32) as usize;
            items.swap(i, j);
        }
    }
}

// =============================================================================
// MATCH RNG SLOT
// =============================================================================

/// Errors from the match RNG slot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RngError {
    /// Read before a seed was installed.
    #[error("Match RNG used before initialization")]
    Uninitialized,

    /// A seed was already installed for this match.
    #[error("Match RNG already initialized with seed {0}")]
    AlreadyInstalled(u32),
}

/// Explicitly-initialized holder of the per-match RNG.
///
/// One slot per simulation. Created empty, filled once at match start with the
/// agreed seed, never reset in place. Replays build a fresh slot.
#[derive(Clone, Debug, Default)]
pub struct RngSlot {
    rng: Option<DeterministicRng>,
}

impl RngSlot {
    /// An empty slot.
    pub fn empty() -> Self {
        Self { rng: None }
    }

    /// A slot already seeded.
    pub fn seeded(seed: u32) -> Self {
        Self { rng: Some(DeterministicRng::new(seed)) }
    }

    /// Install the match seed.
    pub fn install(&mut self, seed: u32) -> Result<(), RngError> {
        if let Some(rng) = &self.rng {
            return Err(RngError::AlreadyInstalled(rng.seed()));
        }
        self.rng = Some(DeterministicRng::new(seed));
        Ok(())
    }

    /// Whether a seed has been installed.
    pub fn is_initialized(&self) -> bool {
        self.rng.is_some()
    }

    /// Shared access to the RNG.
    pub fn get(&self) -> Result<&DeterministicRng, RngError> {
        self.rng.as_ref().ok_or(RngError::Uninitialized)
    }

    /// Mutable access to the RNG.
    pub fn get_mut(&mut self) -> Result<&mut DeterministicRng, RngError> {
        self.rng.as_mut().ok_or(RngError::Uninitialized)
    }
}

// =============================================================================
// TESTS
// =============================================================================
