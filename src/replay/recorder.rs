//! Replay Recorder
//!
//! Captures the command stream exactly as the simulation consumed it.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use super::record::{Checkpoint, ReplayId, ReplayRecord, REPLAY_VERSION};
use crate::core::hash::Fingerprint;
use crate::lockstep::command::{Command, CommandKind, Tick};
use crate::lockstep::setup::MatchSetup;

/// Records one match.
#[derive(Debug)]
pub struct ReplayRecorder {
    id: ReplayId,
    setup: MatchSetup,
    tick_rate: u32,
    commands: Vec<Command>,
    checkpoints: Vec<Checkpoint>,
    end_tick: Tick,
    started: Instant,
    recorded_at: DateTime<Utc>,
}

impl ReplayRecorder {
    /// Begin recording a match.
    pub fn start(setup: MatchSetup, tick_rate: u32) -> Self {
        let id = Uuid::new_v4();
        info!(replay = %id, seed = setup.seed, "Replay recording started");
        Self {
            id,
            setup,
            tick_rate,
            commands: Vec::new(),
            checkpoints: Vec::new(),
            end_tick: 0,
            started: Instant::now(),
            recorded_at: Utc::now(),
        }
    }

    /// Record the commands applied on `tick`, already in execution order.
    ///
    /// Everything the simulation saw is kept, idle sentinels included, so
    /// playback hands it the same slices. Fingerprint traffic is left out.
    /// Ticks must be recorded in order; a tick behind the recording is ignored.
    pub fn record_tick(&mut self, tick: Tick, applied: &[Command]) -> bool {
        if tick < self.end_tick {
            warn!(tick, end_tick = self.end_tick, "Ignoring out-of-order tick");
            return false;
        }
        self.commands.extend(
            applied
                .iter()
                .filter(|c| !matches!(c.kind, CommandKind::StateFingerprint { .. }))
                .cloned(),
        );
        self.end_tick = tick + 1;
        true
    }

    /// Record the fingerprint after `tick`.
    pub fn record_checkpoint(&mut self, tick: Tick, fingerprint: Fingerprint) {
        if self.checkpoints.last().map(|c| c.tick >= tick).unwrap_or(false) {
            warn!(tick, "Ignoring out-of-order checkpoint");
            return;
        }
        self.checkpoints.push(Checkpoint { tick, fingerprint });
    }

    /// Replay id.
    pub fn id(&self) -> ReplayId {
        self.id
    }

    /// Ticks recorded.
    pub fn end_tick(&self) -> Tick {
        self.end_tick
    }

    /// Commands recorded.
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Finish and produce the record.
    pub fn stop(self) -> ReplayRecord {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        info!(
            replay = %self.id,
            ticks = self.end_tick,
            commands = self.commands.len(),
            duration_ms,
            "Replay recording stopped"
        );
        ReplayRecord {
            version: REPLAY_VERSION,
            id: self.id,
            seed: self.setup.seed,
            participants: self.setup.participants,
            map: self.setup.map,
            commands: self.commands,
            checkpoints: self.checkpoints,
            end_tick: self.end_tick,
            tick_rate: self.tick_rate,
            duration_ms,
            recorded_at: self.recorded_at,
        }
    }
}
