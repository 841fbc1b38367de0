//! Replay Record
//!
//! Everything needed to reproduce a match: the setup, every applied command
//! in execution order, and fingerprint checkpoints for verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::hash::Fingerprint;
use crate::lockstep::command::{Command, CommandKind, Tick};
use crate::lockstep::setup::{MapConfig, MatchSetup, Participant};

/// Current record format version. Other versions are rejected on load.
pub const REPLAY_VERSION: u32 = 1;

/// Replay identifier.
pub type ReplayId = Uuid;

/// Replay errors.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// JSON decode/encode failure.
    #[error("Malformed replay JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary decode/encode failure.
    #[error("Malformed replay binary: {0}")]
    Binary(#[from] bincode::Error),

    /// Storage failure.
    #[error("Replay storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Written by an incompatible version.
    #[error("Replay version {found} is not supported (expected {expected})")]
    VersionMismatch {
        /// Version in the record.
        found: u32,
        /// Version this build reads.
        expected: u32,
    },

    /// Structurally valid but self-contradictory.
    #[error("Inconsistent replay: {0}")]
    Inconsistent(String),

    /// No record with this id.
    #[error("Replay {0} not found")]
    NotFound(ReplayId),

    /// Playback cannot move backwards.
    #[error("Cannot seek backwards from tick {current} to {target}")]
    BackwardSeek {
        /// Cursor tick.
        current: Tick,
        /// Requested tick.
        target: Tick,
    },
}

/// Fingerprint taken after a tick was simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Tick just simulated.
    pub tick: Tick,
    /// State fingerprint after it.
    pub fingerprint: Fingerprint,
}

/// A recorded match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Format version.
    pub version: u32,
    /// Unique id.
    pub id: ReplayId,
    /// Match RNG seed.
    pub seed: u32,
    /// Participants.
    pub participants: Vec<Participant>,
    /// Map snapshot.
    pub map: MapConfig,
    /// Applied commands in execution order.
    pub commands: Vec<Command>,
    /// Fingerprint checkpoints, ascending by tick.
    pub checkpoints: Vec<Checkpoint>,
    /// Number of ticks simulated.
    pub end_tick: Tick,
    /// Simulation rate (Hz).
    pub tick_rate: u32,
    /// Wall-clock duration of the recording (ms).
    pub duration_ms: u64,
    /// When recording started.
    pub recorded_at: DateTime<Utc>,
}

impl ReplayRecord {
    /// The setup to rebuild the simulation from.
    pub fn setup(&self) -> MatchSetup {
        MatchSetup {
            seed: self.seed,
            participants: self.participants.clone(),
            map: self.map.clone(),
        }
    }

    /// Check version and internal consistency.
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.version != REPLAY_VERSION {
            return Err(ReplayError::VersionMismatch { found: self.version, expected: REPLAY_VERSION });
        }
        if self.tick_rate == 0 {
            return Err(ReplayError::Inconsistent("tick rate is zero".into()));
        }

        let setup = self.setup();
        let mut previous: Option<(Tick, &str, u32)> = None;
        for command in &self.commands {
            if command.tick >= self.end_tick {
                return Err(ReplayError::Inconsistent(format!(
                    "command at tick {} beyond end tick {}",
                    command.tick, self.end_tick
                )));
            }
            if matches!(command.kind, CommandKind::StateFingerprint { .. }) {
                return Err(ReplayError::Inconsistent("fingerprint traffic in command stream".into()));
            }
            if setup.participant(&command.originator).is_none() {
                return Err(ReplayError::Inconsistent(format!(
                    "command from non-participant {}",
                    command.originator
                )));
            }
            let key = (command.tick, command.originator.as_str(), command.sequence);
            if let Some(prev) = previous {
                if key <= prev {
                    return Err(ReplayError::Inconsistent(format!(
                        "commands out of order at tick {}",
                        command.tick
                    )));
                }
            }
            previous = Some(key);
        }

        let mut last_checkpoint: Option<Tick> = None;
        for checkpoint in &self.checkpoints {
            if checkpoint.tick >= self.end_tick {
                return Err(ReplayError::Inconsistent(format!(
                    "checkpoint at tick {} beyond end tick {}",
                    checkpoint.tick, self.end_tick
                )));
            }
            if last_checkpoint.map(|t| checkpoint.tick <= t).unwrap_or(false) {
                return Err(ReplayError::Inconsistent("checkpoints out of order".into()));
            }
            last_checkpoint = Some(checkpoint.tick);
        }
        Ok(())
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ReplayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize and validate from JSON.
    pub fn from_json(s: &str) -> Result<Self, ReplayError> {
        let record: Self = serde_json::from_str(s)?;
        record.validate()?;
        Ok(record)
    }

    /// Serialize to compact binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize and validate from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReplayError> {
        let record: Self = bincode::deserialize(data)?;
        record.validate()?;
        Ok(record)
    }

    /// Commands scheduled for `tick`.
    pub fn commands_at(&self, tick: Tick) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(move |c| c.tick == tick)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::hash::hash_with_domain;
    use crate::core::vec2::FixedVec2;
    use crate::lockstep::setup::Faction;

    pub(crate) fn sample_record() -> ReplayRecord {
        ReplayRecord {
            version: REPLAY_VERSION,
            id: Uuid::new_v4(),
            seed: 12345,
            participants: vec![
                Participant::new("alice", Faction::Radiant, 0),
                Participant::new("bob", Faction::Solari, 1),
            ],
            map: MapConfig::standard(),
            commands: vec![
                Command::new(
                    10,
                    "alice",
                    0,
                    CommandKind::UnitMove { unit_ids: vec![1, 2], target: FixedVec2::from_ints(-100, 40) },
                ),
                Command::new(10, "bob", 0, CommandKind::ProduceUnit { unit_type: "scout".into() }),
                Command::new(
                    50,
                    "bob",
                    3,
                    CommandKind::Custom { tag: "emote".into(), data: "{\"id\":7}".into() },
                ),
            ],
            checkpoints: vec![
                Checkpoint { tick: 0, fingerprint: hash_with_domain(b"t", b"0") },
                Checkpoint { tick: 59, fingerprint: hash_with_domain(b"t", b"59") },
            ],
            end_tick: 60,
            tick_rate: 60,
            duration_ms: 1_000,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_json_round_trip() {
        let record = sample_record();
        let json = record.to_json().unwrap();
        assert_eq!(ReplayRecord::from_json(&json).unwrap(), record);
    }

    #[test]
    fn test_binary_round_trip() {
        let record = sample_record();
        let bytes = record.to_bytes().unwrap();
        assert_eq!(ReplayRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_rejects_other_version() {
        let mut record = sample_record();
        record.version = 2;
        let json = serde_json::to_string(&record).unwrap();
        assert!(matches!(
            ReplayRecord::from_json(&json),
            Err(ReplayError::VersionMismatch { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(ReplayRecord::from_json("{\"version\":1}"), Err(ReplayError::Json(_))));
        assert!(matches!(ReplayRecord::from_bytes(&[1, 2, 3]), Err(ReplayError::Binary(_))));
    }

    #[test]
    fn test_rejects_inconsistent() {
        let mut out_of_order = sample_record();
        out_of_order.commands.swap(0, 1);
        assert!(matches!(out_of_order.validate(), Err(ReplayError::Inconsistent(_))));

        let mut past_end = sample_record();
        past_end.end_tick = 50;
        assert!(matches!(past_end.validate(), Err(ReplayError::Inconsistent(_))));

        let mut stranger = sample_record();
        stranger.commands.push(Command::noop(55, "mallory"));
        assert!(matches!(stranger.validate(), Err(ReplayError::Inconsistent(_))));
    }

    #[test]
    fn test_commands_at() {
        let record = sample_record();
        assert_eq!(record.commands_at(10).count(), 2);
        assert_eq!(record.commands_at(11).count(), 0);
    }
}
