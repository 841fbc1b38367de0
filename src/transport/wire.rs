//! Wire Frames
//!
//! JSON text frames exchanged over peer links.

use serde::{Deserialize, Serialize};

use crate::core::hash::Fingerprint;
use crate::lockstep::command::{Command, PlayerId};

/// Peer-to-peer frame.
// Internally tagged for readable JSON; bincode cannot decode this form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// First frame on every link.
    Hello {
        /// Sender id.
        peer_id: PlayerId,
        /// Sender's lockstep policy digest.
        policy_digest: Fingerprint,
    },

    /// Batched commands, in send order.
    Batch {
        /// Sender id.
        sender: PlayerId,
        /// Batch sequence number.
        seq: u64,
        /// Commands.
        commands: Vec<Command>,
    },

    /// Latency probe.
    Ping {
        /// Sender's clock (ms since its transport started).
        sent_at_ms: u64,
    },

    /// Probe reply, echoing the ping.
    Pong {
        /// Echoed clock value.
        sent_at_ms: u64,
    },

    /// Orderly shutdown.
    Bye,
}

impl WireMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockstep::command::CommandKind;

    #[test]
    fn test_batch_json_shape() {
        let msg = WireMessage::Batch {
            sender: "alice".into(),
            seq: 3,
            commands: vec![
                Command::noop(5, "alice"),
                Command::new(5, "alice", 1, CommandKind::ProduceUnit { unit_type: "scout".into() }),
            ],
        };
        let json = msg.to_json().unwrap();
        assert!(json.starts_with("{\"type\":\"batch\""));
        assert_eq!(WireMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(WireMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert_eq!(WireMessage::from_json(r#"{"type":"bye"}"#).unwrap(), WireMessage::Bye);
    }
}
