//! Reference SoL Simulation
//!
//! A compact, fully deterministic slice of the SoL game: factions, Solarium,
//! Stellar Forges, Solar Mirrors and units. It implements the
//! [`Simulation`](crate::lockstep::Simulation) collaborator so matches can be
//! played, recorded and replayed end to end.
//!
//! ## Module Structure
//!
//! - `state`: Players, structures, units and the state fingerprint
//! - `sim`: Tick update and command application

pub mod state;
pub mod sim;

// Re-export key types
pub use state::{SolState, PlayerState, Unit, UnitType};
pub use sim::{SolSimulation, SolSimulationFactory};
