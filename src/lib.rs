//! # SoL Lockstep
//!
//! Deterministic lockstep synchronization and replay for SoL matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SOL LOCKSTEP                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Seeded Mulberry32 PRNG                    │
//! │  └── hash.rs     - State fingerprints                        │
//! │                                                              │
//! │  lockstep/       - Synchronization (deterministic)           │
//! │  ├── command.rs  - Commands and within-tick order            │
//! │  ├── validator.rs- Structural and rate-limit checks          │
//! │  ├── queue.rs    - Per-tick buffering and timeouts           │
//! │  ├── verifier.rs - Desync detection                          │
//! │  └── session.rs  - Per-peer lockstep loop                    │
//! │                                                              │
//! │  game/           - Reference SoL simulation                  │
//! │  replay/         - Recording, playback, storage              │
//! │                                                              │
//! │  transport/      - Networking (non-deterministic)            │
//! │  ├── peer.rs     - WebSocket peer mesh                       │
//! │  ├── loopback.rs - In-process hub                            │
//! │  ├── signaling.rs- Connection bootstrap                      │
//! │  └── wire.rs     - Frame types                               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! Given the same setup and the same per-tick command lists, every peer and
//! every replay produces the same state fingerprints:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time inside a tick
//! - All randomness from the match-seeded Mulberry32 generator
//! - Commands within a tick applied in (originator, sequence) order

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod lockstep;
pub mod replay;
pub mod transport;

// Re-export commonly used types
pub use config::LockstepConfig;
pub use core::fixed::{Fixed, FIXED_HALF, FIXED_ONE, FIXED_SCALE};
pub use core::hash::Fingerprint;
pub use core::rng::{DeterministicRng, RngSlot};
pub use core::vec2::FixedVec2;
pub use lockstep::{Command, CommandKind, LockstepSession, MatchSetup, PlayerId, SessionEvent, Tick};
pub use replay::{ReplayPlayer, ReplayRecord, ReplayStore};
pub use transport::{Transport, TransportEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
