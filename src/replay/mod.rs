//! Replay System
//!
//! ```text
//! LockstepSession ──record_tick──► ReplayRecorder ──stop──► ReplayRecord
//!                                                              │
//!                                      ReplayStore ◄──save/load┤
//!                                                              ▼
//!                     SimulationFactory ──create──► ReplayPlayer ──step──► Simulation
//! ```
//!
//! A record holds only what the simulation consumed: setup, ordered commands,
//! and checkpoint fingerprints. Replaying it with the same simulation yields
//! the same fingerprints.

pub mod player;
pub mod record;
pub mod recorder;
pub mod store;

pub use player::{CheckpointResult, PlaybackCursor, PlaybackState, ReplayPlayer, MAX_PLAYBACK_SPEED};
pub use record::{Checkpoint, ReplayError, ReplayId, ReplayRecord, REPLAY_VERSION};
pub use recorder::ReplayRecorder;
pub use store::{FileReplayStore, MemoryReplayStore, ReplayStore};
