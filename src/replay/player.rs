//! Replay Player
//!
//! Rebuilds a simulation from a record's setup and feeds it the recorded
//! commands tick by tick, ordered exactly as live play orders them. Recorded
//! checkpoints are compared as their ticks pass.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::record::{ReplayError, ReplayRecord};
use crate::core::fixed::{tick_delta, Fixed};
use crate::core::hash::Fingerprint;
use crate::lockstep::command::{sort_for_execution, Tick};
use crate::lockstep::simulation::{Simulation, SimulationFactory};

/// Fastest playback speed accepted by [`ReplayPlayer::set_speed`].
pub const MAX_PLAYBACK_SPEED: f64 = 256.0;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Advancing on `update`.
    Playing,
    /// Holding position.
    Paused,
    /// Reached the end of the record.
    Finished,
}

/// Position within a replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackCursor {
    /// Index of the next unconsumed command.
    pub next_command_index: usize,
    /// Next tick to simulate.
    pub current_tick: Tick,
    /// Playback state.
    pub state: PlaybackState,
    /// Speed multiplier (1.0 = real time).
    pub speed: f64,
}

/// Outcome of comparing one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Checkpoint tick.
    pub tick: Tick,
    /// Recorded fingerprint.
    pub expected: Fingerprint,
    /// Fingerprint during playback.
    pub computed: Fingerprint,
    /// Whether they match.
    pub valid: bool,
}

/// Deterministic replay driver.
pub struct ReplayPlayer<S: Simulation> {
    record: ReplayRecord,
    sim: S,
    cursor: PlaybackCursor,
    dt: Fixed,
    tick_duration: Duration,
    accumulator: Duration,
    next_checkpoint: usize,
    results: Vec<CheckpointResult>,
}

impl<S: Simulation> ReplayPlayer<S> {
    /// Validate the record and build a fresh simulation from its setup.
    pub fn initialize<F>(record: ReplayRecord, factory: &F) -> Result<Self, ReplayError>
    where
        F: SimulationFactory<Sim = S>,
    {
        record.validate()?;
        let sim = factory.create(&record.setup());
        let state = if record.end_tick == 0 {
            PlaybackState::Finished
        } else {
            PlaybackState::Playing
        };
        info!(replay = %record.id, ticks = record.end_tick, commands = record.commands.len(), "Replay loaded");
        Ok(Self {
            dt: tick_delta(record.tick_rate),
            tick_duration: Duration::from_secs_f64(1.0 / record.tick_rate as f64),
            record,
            sim,
            cursor: PlaybackCursor {
                next_command_index: 0,
                current_tick: 0,
                state,
                speed: 1.0,
            },
            accumulator: Duration::ZERO,
            next_checkpoint: 0,
            results: Vec::new(),
        })
    }

    /// Resume playback.
    pub fn play(&mut self) {
        if self.cursor.state == PlaybackState::Paused {
            self.cursor.state = PlaybackState::Playing;
            if self.cursor.speed <= 0.0 {
                self.cursor.speed = 1.0;
            }
        }
    }

    /// Pause playback.
    pub fn pause(&mut self) {
        if self.cursor.state == PlaybackState::Playing {
            self.cursor.state = PlaybackState::Paused;
        }
    }

    /// Set the speed multiplier. Zero or less pauses; anything above
    /// [`MAX_PLAYBACK_SPEED`] is clamped to it.
    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_nan() || speed <= 0.0 {
            self.cursor.speed = 0.0;
            self.pause();
        } else {
            self.cursor.speed = speed.min(MAX_PLAYBACK_SPEED);
        }
    }

    /// Advance by wall-clock `elapsed` scaled by speed. Returns ticks stepped.
    pub fn update(&mut self, elapsed: Duration) -> u32 {
        if self.cursor.state != PlaybackState::Playing {
            return 0;
        }
        // Never bank more time than the ticks left to play.
        let remaining = self.tick_duration * self.record.end_tick.saturating_sub(self.cursor.current_tick);
        let scaled = Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.cursor.speed).unwrap_or(remaining);
        self.accumulator = self.accumulator.saturating_add(scaled).min(remaining);
        let mut stepped = 0;
        while self.accumulator >= self.tick_duration && self.step().is_some() {
            self.accumulator -= self.tick_duration;
            stepped += 1;
        }
        stepped
    }

    /// Simulate the cursor tick. Returns the tick simulated, or `None` at the end.
    pub fn step(&mut self) -> Option<Tick> {
        if self.is_finished() {
            return None;
        }
        let tick = self.cursor.current_tick;

        let start = self.cursor.next_command_index;
        let end = start
            + self.record.commands[start..]
                .iter()
                .take_while(|c| c.tick == tick)
                .count();
        let mut commands = self.record.commands[start..end].to_vec();
        sort_for_execution(&mut commands);

        self.sim.advance(self.dt, &commands);
        self.cursor.next_command_index = end;
        self.cursor.current_tick += 1;
        self.check_checkpoints(tick);

        if self.cursor.current_tick >= self.record.end_tick {
            self.cursor.state = PlaybackState::Finished;
            info!(replay = %self.record.id, ticks = self.cursor.current_tick, "Replay finished");
        }
        Some(tick)
    }

    fn check_checkpoints(&mut self, tick: Tick) {
        while let Some(checkpoint) = self.record.checkpoints.get(self.next_checkpoint) {
            if checkpoint.tick > tick {
                break;
            }
            self.next_checkpoint += 1;
            if checkpoint.tick < tick {
                continue;
            }
            let computed = self.sim.fingerprint();
            let valid = computed == checkpoint.fingerprint;
            if valid {
                debug!(tick, "Checkpoint matched");
            } else {
                warn!(
                    tick,
                    expected = %checkpoint.fingerprint.short(),
                    computed = %computed.short(),
                    "Replay diverged from recorded checkpoint"
                );
            }
            self.results.push(CheckpointResult { tick, expected: checkpoint.fingerprint, computed, valid });
        }
    }

    /// Step forward until the cursor reaches `target`. Backward seeks fail.
    pub fn seek_to_tick(&mut self, target: Tick) -> Result<(), ReplayError> {
        if target < self.cursor.current_tick {
            return Err(ReplayError::BackwardSeek { current: self.cursor.current_tick, target });
        }
        while self.cursor.current_tick < target && self.step().is_some() {}
        Ok(())
    }

    /// Play everything that is left. Returns the final fingerprint.
    pub fn run_to_end(&mut self) -> Fingerprint {
        while self.step().is_some() {}
        self.sim.fingerprint()
    }

    /// Whether playback is complete.
    pub fn is_finished(&self) -> bool {
        self.cursor.state == PlaybackState::Finished
    }

    /// Simulated time elapsed in the replay.
    pub fn simulated_time(&self) -> Duration {
        self.tick_duration * self.cursor.current_tick
    }

    /// Cursor.
    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    /// Checkpoint comparisons so far.
    pub fn checkpoint_results(&self) -> &[CheckpointResult] {
        &self.results
    }

    /// First checkpoint that did not match.
    pub fn first_divergence(&self) -> Option<&CheckpointResult> {
        self.results.iter().find(|r| !r.valid)
    }

    /// Current fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.sim.fingerprint()
    }

    /// The simulation being driven.
    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// The record being played.
    pub fn record(&self) -> &ReplayRecord {
        &self.record
    }
}
