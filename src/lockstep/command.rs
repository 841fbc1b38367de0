//! Commands
//!
//! The immutable unit of player intent. A command is scheduled for exactly
//! one tick and identified by `(tick, originator, sequence)`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::core::hash::Fingerprint;
use crate::core::vec2::FixedVec2;

/// Simulation tick number.
pub type Tick = u32;

/// Unit identifier, unique within a match.
pub type UnitId = u32;

/// Peer / player identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create a player id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (never valid on the wire).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlayerId({})", self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PlayerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What a command asks the simulation to do.
///
/// Externally tagged so the same type round-trips through JSON and bincode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Idle sentinel. Completes a tick for its originator and does nothing.
    Noop,

    /// Send units toward a map position.
    UnitMove {
        /// Units to move.
        unit_ids: Vec<UnitId>,
        /// Destination.
        target: FixedVec2,
    },

    /// Clear the movement target of units.
    UnitStop {
        /// Units to stop.
        unit_ids: Vec<UnitId>,
    },

    /// Queue a unit at the originator's Stellar Forge.
    ProduceUnit {
        /// Unit type name (e.g. `"scout"`).
        unit_type: String,
    },

    /// Build a Solar Mirror.
    PlaceMirror {
        /// Mirror position.
        position: FixedVec2,
    },

    /// State fingerprint exchange. Routed to the verifier, never simulated.
    StateFingerprint {
        /// Fingerprint of the originator's state after the command's tick.
        fingerprint: Fingerprint,
    },

    /// Application-defined command.
    Custom {
        /// Type tag.
        tag: String,
        /// Opaque payload.
        data: String,
    },
}

impl CommandKind {
    /// Wire type tag.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Noop => "noop",
            Self::UnitMove { .. } => "unit_move",
            Self::UnitStop { .. } => "unit_stop",
            Self::ProduceUnit { .. } => "produce_unit",
            Self::PlaceMirror { .. } => "place_mirror",
            Self::StateFingerprint { .. } => "state_fingerprint",
            Self::Custom { tag, .. } => tag,
        }
    }

    /// Encoded payload size in bytes (JSON).
    pub fn payload_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Number of unit ids carried.
    pub fn unit_count(&self) -> usize {
        match self {
            Self::UnitMove { unit_ids, .. } | Self::UnitStop { unit_ids } => unit_ids.len(),
            _ => 0,
        }
    }

    /// Whether this is the idle sentinel.
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::Noop)
    }
}

/// A scheduled player command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Tick the command executes on.
    pub tick: Tick,
    /// Issuing player.
    pub originator: PlayerId,
    /// Position among the originator's commands for this tick.
    pub sequence: u32,
    /// Command body.
    pub kind: CommandKind,
}

/// Identity of a command: `(tick, originator, sequence)`.
pub type CommandKey = (Tick, PlayerId, u32);

impl Command {
    /// Create a command.
    pub fn new(tick: Tick, originator: impl Into<PlayerId>, sequence: u32, kind: CommandKind) -> Self {
        Self { tick, originator: originator.into(), sequence, kind }
    }

    /// Idle sentinel for `tick`.
    pub fn noop(tick: Tick, originator: impl Into<PlayerId>) -> Self {
        Self::new(tick, originator, 0, CommandKind::Noop)
    }

    /// Identity key.
    pub fn key(&self) -> CommandKey {
        (self.tick, self.originator.clone(), self.sequence)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Deterministic within-tick order: originator, then sequence.
pub fn execution_order(a: &Command, b: &Command) -> Ordering {
    a.originator
        .cmp(&b.originator)
        .then(a.sequence.cmp(&b.sequence))
}

/// Sort a tick's commands into execution order.
pub fn sort_for_execution(commands: &mut [Command]) {
    commands.sort_by(execution_order);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(CommandKind::Noop.type_tag(), "noop");
        let mv = CommandKind::UnitMove { unit_ids: vec![1], target: FixedVec2::ZERO };
        assert_eq!(mv.type_tag(), "unit_move");
        assert_eq!(mv.unit_count(), 1);
        let custom = CommandKind::Custom { tag: "ping_map".into(), data: String::new() };
        assert_eq!(custom.type_tag(), "ping_map");
    }

    #[test]
    fn test_execution_order_ignores_arrival() {
        let mut cmds = vec![
            Command::new(3, "bob", 1, CommandKind::Noop),
            Command::new(3, "alice", 2, CommandKind::Noop),
            Command::new(3, "bob", 0, CommandKind::Noop),
            Command::new(3, "alice", 0, CommandKind::Noop),
        ];
        sort_for_execution(&mut cmds);
        let keys: Vec<(String, u32)> = cmds
            .iter()
            .map(|c| (c.originator.to_string(), c.sequence))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("alice".into(), 0),
                ("alice".into(), 2),
                ("bob".into(), 0),
                ("bob".into(), 1),
            ]
        );
    }

    #[test]
    fn test_json_shape() {
        let cmd = Command::new(
            10,
            "alice",
            0,
            CommandKind::UnitMove { unit_ids: vec![1, 2], target: FixedVec2::from_ints(5, 5) },
        );
        let json = cmd.to_json().unwrap();
        assert!(json.contains("\"unit_move\""));
        assert!(json.contains("\"originator\":\"alice\""));
        assert_eq!(Command::from_json(&json).unwrap(), cmd);
        assert!(Command::from_json("{\"tick\":1}").is_err());
    }

    #[test]
    fn test_payload_size_grows_with_data() {
        let small = CommandKind::Custom { tag: "t".into(), data: "x".into() };
        let big = CommandKind::Custom { tag: "t".into(), data: "x".repeat(2000) };
        assert!(small.payload_size() < 64);
        assert!(big.payload_size() > 2000);
    }
}
