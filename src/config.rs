//! Lockstep Configuration
//!
//! Timeout, rate-limit, batching and verification policy. The fields that
//! affect which commands land in which tick must be identical on every peer,
//! so they are folded into a policy digest that the peer transport checks
//! during its handshake.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::core::fixed::{self, Fixed};
use crate::core::hash::{Fingerprint, StateHasher};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// A field is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// JSON decode failure.
    #[error("Malformed configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Lockstep policy for one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockstepConfig {
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Queue polls a buffered tick may wait for missing participants.
    pub command_timeout_ticks: u32,
    /// How far ahead of the current tick a command may be scheduled.
    pub max_future_ticks: u32,
    /// Ticks of input delay applied to local commands.
    pub input_delay_ticks: u32,
    /// Maximum encoded payload size of one command (bytes).
    pub max_payload_bytes: usize,
    /// Maximum commands one originator may issue for one tick.
    pub commands_per_tick_limit: u32,
    /// Maximum unit ids carried by one command.
    pub max_units_per_command: usize,
    /// How many ticks of rate-limit history to keep.
    pub rate_window_ticks: u32,
    /// Fingerprint exchange interval (ticks).
    pub verify_interval_ticks: u32,
    /// Replay checkpoint interval (ticks).
    pub checkpoint_interval_ticks: u32,
    /// How long unresolved fingerprints are kept (ticks).
    pub verification_horizon_ticks: u32,
    /// Outbound batch window (milliseconds).
    pub batch_window_ms: u64,
    /// Outbound batch size that forces an early flush.
    pub max_batch_size: usize,
    /// Latency probe interval (milliseconds).
    pub ping_interval_ms: u64,
    /// Record a replay while playing.
    pub record_replay: bool,
}

impl Default for LockstepConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            command_timeout_ticks: 5,
            max_future_ticks: 10,
            input_delay_ticks: 2,
            max_payload_bytes: 1024,
            commands_per_tick_limit: 100,
            max_units_per_command: 256,
            rate_window_ticks: 64,
            verify_interval_ticks: 10,
            checkpoint_interval_ticks: 60,
            verification_horizon_ticks: 100,
            batch_window_ms: 16,
            max_batch_size: 32,
            ping_interval_ms: 1000,
            record_replay: true,
        }
    }
}

impl LockstepConfig {
    /// Load from `LOCKSTEP_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            tick_rate: env_or("LOCKSTEP_TICK_RATE", d.tick_rate)?,
            command_timeout_ticks: env_or("LOCKSTEP_COMMAND_TIMEOUT_TICKS", d.command_timeout_ticks)?,
            max_future_ticks: env_or("LOCKSTEP_MAX_FUTURE_TICKS", d.max_future_ticks)?,
            input_delay_ticks: env_or("LOCKSTEP_INPUT_DELAY_TICKS", d.input_delay_ticks)?,
            max_payload_bytes: env_or("LOCKSTEP_MAX_PAYLOAD_BYTES", d.max_payload_bytes)?,
            commands_per_tick_limit: env_or("LOCKSTEP_COMMANDS_PER_TICK", d.commands_per_tick_limit)?,
            max_units_per_command: env_or("LOCKSTEP_MAX_UNITS_PER_COMMAND", d.max_units_per_command)?,
            rate_window_ticks: env_or("LOCKSTEP_RATE_WINDOW_TICKS", d.rate_window_ticks)?,
            verify_interval_ticks: env_or("LOCKSTEP_VERIFY_INTERVAL_TICKS", d.verify_interval_ticks)?,
            checkpoint_interval_ticks: env_or("LOCKSTEP_CHECKPOINT_INTERVAL_TICKS", d.checkpoint_interval_ticks)?,
            verification_horizon_ticks: env_or("LOCKSTEP_VERIFICATION_HORIZON_TICKS", d.verification_horizon_ticks)?,
            batch_window_ms: env_or("LOCKSTEP_BATCH_WINDOW_MS", d.batch_window_ms)?,
            max_batch_size: env_or("LOCKSTEP_MAX_BATCH_SIZE", d.max_batch_size)?,
            ping_interval_ms: env_or("LOCKSTEP_PING_INTERVAL_MS", d.ping_interval_ms)?,
            record_replay: std::env::var("LOCKSTEP_RECORD_REPLAY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(d.record_replay),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the lockstep loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be positive".into()));
        }
        if self.command_timeout_ticks == 0 {
            return Err(ConfigError::Invalid("command_timeout_ticks must be at least 1".into()));
        }
        if self.input_delay_ticks > self.max_future_ticks {
            return Err(ConfigError::Invalid(
                "input_delay_ticks cannot exceed max_future_ticks".into(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Duration of one tick in fixed-point seconds.
    pub fn tick_delta(&self) -> Fixed {
        fixed::tick_delta(self.tick_rate)
    }

    /// Duration of one tick in wall-clock time.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Outbound batch window.
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Latency probe interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Digest of every field that must agree across peers.
    ///
    /// Local-only knobs (`record_replay`) are excluded.
    pub fn policy_digest(&self) -> Fingerprint {
        let mut h = StateHasher::new(b"SOL_LOCKSTEP_POLICY_V1");
        h.update_u32(self.tick_rate);
        h.update_u32(self.command_timeout_ticks);
        h.update_u32(self.max_future_ticks);
        h.update_u32(self.input_delay_ticks);
        h.update_u64(self.max_payload_bytes as u64);
        h.update_u32(self.commands_per_tick_limit);
        h.update_u64(self.max_units_per_command as u64);
        h.update_u32(self.verify_interval_ticks);
        h.update_u64(self.batch_window_ms);
        h.update_u64(self.max_batch_size as u64);
        h.finalize()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
