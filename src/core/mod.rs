//! Core deterministic primitives.
//!
//! Everything the simulation needs to evolve identically on every peer:
//! fixed-point math, the seeded RNG, and state fingerprints.

pub mod fixed;
pub mod vec2;
pub mod rng;
pub mod hash;

// Re-export core types
pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
pub use rng::{DeterministicRng, RngError, RngSlot};
pub use hash::{Fingerprint, StateHasher};
