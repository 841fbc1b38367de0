//! Command Validator
//!
//! Structural and rate-limit gate in front of the command queue. Rejections
//! are logged and counted, never raised. Legality of a command within the
//! game rules is the simulation's business.

use std::collections::BTreeMap;
use tracing::warn;

use super::command::{Command, PlayerId, Tick};
use crate::config::LockstepConfig;

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// No originator.
    #[error("Command has no originator")]
    EmptyOriginator,

    /// Custom command with an empty type tag.
    #[error("Command has no type")]
    EmptyCommandType,

    /// Encoded payload too large.
    #[error("Payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Too many unit ids.
    #[error("Command references {count} units, limit is {limit}")]
    TooManyUnits {
        /// Units referenced.
        count: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Originator exceeded its per-tick budget.
    #[error("{originator} exceeded {limit} commands for tick {tick}")]
    RateLimited {
        /// Offending originator.
        originator: PlayerId,
        /// Tick.
        tick: Tick,
        /// Configured limit.
        limit: u32,
    },
}

/// Validator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorStats {
    /// Commands accepted.
    pub accepted: u64,
    /// Commands rejected.
    pub rejected: u64,
}

/// Structural and rate-limit gate.
#[derive(Debug)]
pub struct CommandValidator {
    max_payload_bytes: usize,
    max_units_per_command: usize,
    commands_per_tick_limit: u32,
    rate_window_ticks: u32,
    /// Accepted commands per (tick, originator).
    counts: BTreeMap<(Tick, PlayerId), u32>,
    newest_tick: Tick,
    stats: ValidatorStats,
}

impl CommandValidator {
    /// Create a validator with the limits from `config`.
    pub fn new(config: &LockstepConfig) -> Self {
        Self {
            max_payload_bytes: config.max_payload_bytes,
            max_units_per_command: config.max_units_per_command,
            commands_per_tick_limit: config.commands_per_tick_limit,
            rate_window_ticks: config.rate_window_ticks,
            counts: BTreeMap::new(),
            newest_tick: 0,
            stats: ValidatorStats::default(),
        }
    }

    /// Validate and count a command. Logs the reason on rejection.
    pub fn validate(&mut self, command: &Command) -> bool {
        match self.check(command) {
            Ok(()) => true,
            Err(reason) => {
                warn!(
                    tick = command.tick,
                    originator = %command.originator,
                    kind = command.kind.type_tag(),
                    "Rejected command: {}",
                    reason
                );
                false
            }
        }
    }

    /// Validate and count a command, returning the rejection reason.
    pub fn check(&mut self, command: &Command) -> Result<(), Rejection> {
        if let Err(reason) = self.inspect(command) {
            self.stats.rejected += 1;
            return Err(reason);
        }

        let key = (command.tick, command.originator.clone());
        let count = self.counts.entry(key).or_insert(0);
        if *count >= self.commands_per_tick_limit {
            self.stats.rejected += 1;
            return Err(Rejection::RateLimited {
                originator: command.originator.clone(),
                tick: command.tick,
                limit: self.commands_per_tick_limit,
            });
        }
        *count += 1;
        self.stats.accepted += 1;

        if command.tick > self.newest_tick {
            self.newest_tick = command.tick;
            self.prune();
        }
        Ok(())
    }

    /// Structural checks only. Does not count toward the rate limit.
    pub fn inspect(&self, command: &Command) -> Result<(), Rejection> {
        if command.originator.is_empty() {
            return Err(Rejection::EmptyOriginator);
        }
        if command.kind.type_tag().is_empty() {
            return Err(Rejection::EmptyCommandType);
        }
        let units = command.kind.unit_count();
        if units > self.max_units_per_command {
            return Err(Rejection::TooManyUnits { count: units, limit: self.max_units_per_command });
        }
        let size = command.kind.payload_size();
        if size > self.max_payload_bytes {
            return Err(Rejection::PayloadTooLarge { size, limit: self.max_payload_bytes });
        }
        Ok(())
    }

    /// Drop rate-limit history older than the window.
    fn prune(&mut self) {
        let cutoff = self.newest_tick.saturating_sub(self.rate_window_ticks);
        if cutoff > 0 {
            self.counts = self.counts.split_off(&(cutoff, PlayerId::default()));
        }
    }

    /// Number of (tick, originator) entries currently tracked.
    pub fn tracked_entries(&self) -> usize {
        self.counts.len()
    }

    /// Counters.
    pub fn stats(&self) -> ValidatorStats {
        self.stats
    }

    /// Forget all rate-limit history.
    pub fn clear(&mut self) {
        self.counts.clear();
        self.newest_tick = 0;
    }
}
