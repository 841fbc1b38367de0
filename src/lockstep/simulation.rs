//! Simulation Collaborator
//!
//! The lockstep core only needs three things from the game: advance by one
//! tick given an ordered command list, report a comparable fingerprint, and
//! be constructible from a [`MatchSetup`].

use super::command::{Command, Tick};
use super::setup::MatchSetup;
use crate::core::fixed::Fixed;
use crate::core::hash::Fingerprint;

/// A deterministic simulation driven one tick at a time.
pub trait Simulation {
    /// Advance one tick of length `dt` applying `commands` in the given order.
    fn advance(&mut self, dt: Fixed, commands: &[Command]);

    /// Fingerprint of the current state.
    fn fingerprint(&self) -> Fingerprint;

    /// Number of ticks simulated so far.
    fn tick(&self) -> Tick;
}

/// Builds fresh simulations from a match setup.
pub trait SimulationFactory {
    /// Simulation type produced.
    type Sim: Simulation;

    /// Construct a simulation in its tick-zero state.
    fn create(&self, setup: &MatchSetup) -> Self::Sim;
}
