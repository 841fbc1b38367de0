//! Command Queue
//!
//! Buffers commands per tick and decides when a tick may be simulated.
//!
//! ```text
//!   add_command ──► [tick N] [tick N+1] ... [tick N+max_future]
//!                      │
//!   next_tick_commands ┘  complete? ──► release, sorted by (originator, sequence)
//!                         waited >= timeout? ──► release partial, count missing
//!                         otherwise ──► None
//! ```
//!
//! The wait clock counts polls, not wall time, so every peer that polls once
//! per game-loop iteration applies the same policy.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use super::command::{Command, PlayerId, Tick};
use crate::config::LockstepConfig;

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Participant slots left empty by timed-out ticks.
    pub missed_commands: u64,
    /// Ticks released partially after the timeout.
    pub timed_out_ticks: u64,
    /// Ticks released.
    pub released_ticks: u64,
    /// Exact duplicates dropped.
    pub duplicates: u64,
    /// Commands for ticks already consumed.
    pub stale: u64,
    /// Commands scheduled too far ahead.
    pub too_far_ahead: u64,
}

/// Details of the most recent timed-out tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickTimeout {
    /// Tick released partially.
    pub tick: Tick,
    /// Participants with no command for it.
    pub missing: Vec<PlayerId>,
}

#[derive(Debug, Default)]
struct TickBucket {
    /// Ordered by (originator, sequence): already execution order.
    commands: BTreeMap<(PlayerId, u32), Command>,
    contributors: BTreeSet<PlayerId>,
    /// Polls spent waiting on this tick.
    waited: u32,
}

/// Per-tick command buffer with timeout policy.
#[derive(Debug)]
pub struct CommandQueue {
    expected: BTreeSet<PlayerId>,
    buckets: BTreeMap<Tick, TickBucket>,
    current_tick: Tick,
    timeout_ticks: u32,
    max_future_ticks: u32,
    stats: QueueStats,
    last_timeout: Option<TickTimeout>,
}

impl CommandQueue {
    /// Create a queue expecting one command per tick from each of `expected`.
    pub fn new(expected: BTreeSet<PlayerId>, config: &LockstepConfig) -> Self {
        Self {
            expected,
            buckets: BTreeMap::new(),
            current_tick: 0,
            timeout_ticks: config.command_timeout_ticks.max(1),
            max_future_ticks: config.max_future_ticks,
            stats: QueueStats::default(),
            last_timeout: None,
        }
    }

    /// Buffer a command. Returns `false` if it was stale, too far ahead or a duplicate.
    pub fn add_command(&mut self, command: Command) -> bool {
        if command.tick < self.current_tick {
            self.stats.stale += 1;
            debug!(tick = command.tick, current = self.current_tick, originator = %command.originator, "Dropping stale command");
            return false;
        }
        if command.tick > self.current_tick.saturating_add(self.max_future_ticks) {
            self.stats.too_far_ahead += 1;
            warn!(tick = command.tick, current = self.current_tick, originator = %command.originator, "Dropping command scheduled too far ahead");
            return false;
        }

        let bucket = self.buckets.entry(command.tick).or_default();
        let key = (command.originator.clone(), command.sequence);
        if bucket.commands.contains_key(&key) {
            self.stats.duplicates += 1;
            debug!(tick = command.tick, originator = %command.originator, sequence = command.sequence, "Duplicate command");
            return false;
        }
        bucket.contributors.insert(command.originator.clone());
        bucket.commands.insert(key, command);
        true
    }

    /// Poll for the current tick's commands.
    ///
    /// Returns `None` while the tick is incomplete and within its timeout.
    /// Each call spends one unit of wait on the current tick once anything is
    /// buffered, even when later ticks arrived before it did. With nothing
    /// buffered at all the match is idle and no wait accrues.
    pub fn next_tick_commands(&mut self) -> Option<Vec<Command>> {
        let tick = self.current_tick;

        if self.buckets.is_empty() {
            if self.expected.is_empty() {
                return Some(self.release(tick, Vec::new()));
            }
            return None;
        }
        let bucket = self.buckets.entry(tick).or_default();

        let missing: Vec<PlayerId> = self
            .expected
            .iter()
            .filter(|p| !bucket.contributors.contains(*p))
            .cloned()
            .collect();

        if !missing.is_empty() {
            bucket.waited += 1;
            if bucket.waited < self.timeout_ticks {
                return None;
            }
        }

        let bucket = self.buckets.remove(&tick).unwrap_or_default();
        let commands: Vec<Command> = bucket.commands.into_values().collect();

        if !missing.is_empty() {
            self.stats.missed_commands += missing.len() as u64;
            self.stats.timed_out_ticks += 1;
            warn!(tick, missing = ?missing, "Tick timed out, proceeding with partial commands");
            self.last_timeout = Some(TickTimeout { tick, missing });
        }

        Some(self.release(tick, commands))
    }

    fn release(&mut self, tick: Tick, commands: Vec<Command>) -> Vec<Command> {
        self.current_tick = tick + 1;
        self.stats.released_ticks += 1;
        self.sweep();
        commands
    }

    /// Remove any bucket behind the current tick.
    fn sweep(&mut self) {
        let current = self.current_tick;
        self.buckets.retain(|tick, _| *tick >= current);
    }

    /// Start expecting commands from `player`.
    pub fn add_participant(&mut self, player: PlayerId) {
        self.expected.insert(player);
    }

    /// Stop expecting commands from `player`.
    pub fn remove_participant(&mut self, player: &PlayerId) -> bool {
        self.expected.remove(player)
    }

    /// Expected participants.
    pub fn participants(&self) -> &BTreeSet<PlayerId> {
        &self.expected
    }

    /// Next tick to be released.
    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    /// Number of ticks with buffered commands.
    pub fn buffered_ticks(&self) -> usize {
        self.buckets.len()
    }

    /// Whether `player` has contributed to `tick`.
    pub fn has_contribution(&self, tick: Tick, player: &PlayerId) -> bool {
        self.buckets
            .get(&tick)
            .map(|b| b.contributors.contains(player))
            .unwrap_or(false)
    }

    /// Counters.
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Most recent partial release, if any.
    pub fn last_timeout(&self) -> Option<&TickTimeout> {
        self.last_timeout.as_ref()
    }

    /// Drop all buffered commands.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
