//! Transport Layer
//!
//! Moves commands between peers. The lockstep loop is synchronous, so the
//! [`Transport`] trait is too: async network tasks push into channels that
//! the loop drains once per tick.
//!
//! ```text
//! ┌──────────────┐  send_command   ┌────────────┐   frames   ┌────────────┐
//! │ LockstepLoop │ ──────────────► │  batcher   │ ─────────► │ peer links │
//! │  (one tick)  │ ◄────────────── │  channels  │ ◄───────── │  (tokio)   │
//! └──────────────┘  recv_commands  └────────────┘            └────────────┘
//! ```
//!
//! - `peer`: WebSocket mesh bootstrapped over signaling
//! - `loopback`: in-process hub for tests and local play
//! - `signaling`: bootstrap collaborator and in-memory hub
//! - `wire`: frame types
//! - `batch`: outbound batching window

pub mod batch;
pub mod loopback;
pub mod peer;
pub mod signaling;
pub mod wire;

use serde::{Deserialize, Serialize};

use crate::lockstep::command::{Command, PlayerId};

pub use batch::OutboundBatch;
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use peer::{PeerTransport, PeerTransportConfig};
pub use signaling::{MemorySignaling, SignalEnvelope, SignalPayload, Signaling};
pub use wire::WireMessage;

/// Lifecycle of one peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    /// Exchanging offer/answer over signaling.
    Signaling,
    /// Transport connection in progress.
    Connecting,
    /// Link up.
    Connected,
    /// Link lost.
    Disconnected,
    /// Link could not be established or was rejected.
    Failed,
    /// Link shut down deliberately.
    Closed,
}

impl PeerState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Connectivity changes, drained by the lockstep loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer link came up.
    PeerConnected {
        /// Peer.
        peer: PlayerId,
    },
    /// A peer link went down.
    PeerDisconnected {
        /// Peer.
        peer: PlayerId,
        /// Terminal state it ended in.
        state: PeerState,
    },
    /// Every expected peer is connected.
    Ready,
    /// At least one expected peer is no longer connected.
    NotReady,
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Every expected peer connected.
    pub connected: bool,
    /// Worst round-trip time across peers (ms).
    pub latency_ms: u32,
    /// Frames sent.
    pub packets_sent: u64,
    /// Frames received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_out: u64,
    /// Bytes received.
    pub bytes_in: u64,
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport was disconnected.
    #[error("Transport closed")]
    Closed,

    /// Frame encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Signaling channel failure.
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Peer runs a different lockstep policy.
    #[error("Peer {0} runs a different lockstep policy")]
    PolicyMismatch(PlayerId),
}

/// Command transport between peers.
///
/// Implementations deliver each sender's commands in the order they were sent.
pub trait Transport {
    /// Broadcast a local command to every peer.
    fn send_command(&mut self, command: &Command) -> Result<(), TransportError>;

    /// Take every command received since the last call.
    fn recv_commands(&mut self) -> Vec<Command>;

    /// Take every connectivity event since the last call.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    /// Whether every expected peer is connected.
    fn is_ready(&self) -> bool;

    /// Tear down all links. Not resumable.
    fn disconnect(&mut self);

    /// Counters.
    fn stats(&self) -> TransportStats;
}
