//! Lockstep Synchronization
//!
//! Every peer runs the same simulation over the same ordered command list for
//! each tick, so no state is exchanged beyond commands and the occasional
//! fingerprint.
//!
//! ## Module Structure
//!
//! - `command`: Command model and canonical within-tick order
//! - `setup`: Match setup (seed, participants, map)
//! - `validator`: Structural and rate-limit gate
//! - `queue`: Per-tick buffering and timeout policy
//! - `verifier`: Fingerprint exchange and desync detection
//! - `simulation`: Collaborator traits for the game
//! - `session`: The per-peer lockstep loop

pub mod command;
pub mod queue;
pub mod session;
pub mod setup;
pub mod simulation;
pub mod validator;
pub mod verifier;

// Re-export key types
pub use command::{Command, CommandKind, PlayerId, Tick, UnitId};
pub use queue::{CommandQueue, QueueStats, TickTimeout};
pub use session::{
    LockstepSession, SessionError, SessionEvent, SessionState, SessionStats, TickOutcome, TickReport,
};
pub use setup::{Faction, MapConfig, MatchSetup, Participant, SunConfig};
pub use simulation::{Simulation, SimulationFactory};
pub use validator::{CommandValidator, Rejection, ValidatorStats};
pub use verifier::{DesyncReport, FingerprintReport, StateVerifier, VerificationEvent};
