//! Loopback Transport
//!
//! In-process transport: every endpoint is wired to every other through
//! unbounded channels. Frames are JSON-encoded so byte counters and decode
//! paths match the network transport.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{PeerState, Transport, TransportError, TransportEvent, TransportStats};
use super::wire::WireMessage;
use crate::lockstep::command::{Command, PlayerId};

#[derive(Debug)]
struct Frame {
    from: PlayerId,
    text: String,
}

/// Builds a fully connected set of loopback endpoints.
pub struct LoopbackHub;

impl LoopbackHub {
    /// One endpoint per id, keyed by id.
    pub fn connect(ids: &[PlayerId]) -> BTreeMap<PlayerId, LoopbackTransport> {
        let mut receivers = BTreeMap::new();
        let mut senders = BTreeMap::new();
        for id in ids {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(id.clone(), tx);
            receivers.insert(id.clone(), rx);
        }

        receivers
            .into_iter()
            .map(|(id, inbox)| {
                let peers: BTreeMap<PlayerId, mpsc::UnboundedSender<Frame>> = senders
                    .iter()
                    .filter(|(peer, _)| **peer != id)
                    .map(|(peer, tx)| (peer.clone(), tx.clone()))
                    .collect();
                let mut events: Vec<TransportEvent> = peers
                    .keys()
                    .map(|peer| TransportEvent::PeerConnected { peer: peer.clone() })
                    .collect();
                events.push(TransportEvent::Ready);

                let transport = LoopbackTransport {
                    local_id: id.clone(),
                    expected_peers: peers.len(),
                    peers,
                    inbox,
                    received: Vec::new(),
                    events,
                    seq: 0,
                    open: true,
                    stats: TransportStats::default(),
                };
                (id, transport)
            })
            .collect()
    }
}

/// One endpoint of a [`LoopbackHub`].
pub struct LoopbackTransport {
    local_id: PlayerId,
    expected_peers: usize,
    peers: BTreeMap<PlayerId, mpsc::UnboundedSender<Frame>>,
    inbox: mpsc::UnboundedReceiver<Frame>,
    received: Vec<Command>,
    events: Vec<TransportEvent>,
    seq: u64,
    open: bool,
    stats: TransportStats,
}

impl LoopbackTransport {
    /// Local id.
    pub fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    fn broadcast(&mut self, message: &WireMessage) -> Result<(), TransportError> {
        let text = message.to_json()?;
        let mut gone = Vec::new();
        for (peer, tx) in &self.peers {
            let frame = Frame { from: self.local_id.clone(), text: text.clone() };
            if tx.send(frame).is_err() {
                gone.push(peer.clone());
                continue;
            }
            self.stats.packets_sent += 1;
            self.stats.bytes_out += text.len() as u64;
        }
        for peer in gone {
            self.drop_peer(peer, PeerState::Disconnected);
        }
        Ok(())
    }

    fn drop_peer(&mut self, peer: PlayerId, state: PeerState) {
        let was_ready = self.is_ready();
        if self.peers.remove(&peer).is_some() {
            debug!(local = %self.local_id, peer = %peer, ?state, "Loopback peer left");
            self.events.push(TransportEvent::PeerDisconnected { peer, state });
            if was_ready {
                self.events.push(TransportEvent::NotReady);
            }
        }
    }

    fn pump(&mut self) {
        while let Ok(frame) = self.inbox.try_recv() {
            self.stats.packets_received += 1;
            self.stats.bytes_in += frame.text.len() as u64;
            match WireMessage::from_json(&frame.text) {
                Ok(WireMessage::Batch { sender, commands, .. }) => {
                    for command in commands {
                        if command.originator != sender {
                            warn!(sender = %sender, originator = %command.originator, "Dropping spoofed command");
                            continue;
                        }
                        self.received.push(command);
                    }
                }
                Ok(WireMessage::Bye) => self.drop_peer(frame.from, PeerState::Closed),
                Ok(other) => debug!("Ignoring loopback frame {:?}", other),
                Err(e) => warn!(from = %frame.from, "Malformed loopback frame: {}", e),
            }
        }
    }
}

impl Transport for LoopbackTransport {
    fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let message = WireMessage::Batch {
            sender: self.local_id.clone(),
            seq: self.seq,
            commands: vec![command.clone()],
        };
        self.seq += 1;
        self.broadcast(&message)
    }

    fn recv_commands(&mut self) -> Vec<Command> {
        self.pump();
        std::mem::take(&mut self.received)
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        self.pump();
        std::mem::take(&mut self.events)
    }

    fn is_ready(&self) -> bool {
        self.open && self.peers.len() == self.expected_peers
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        let _ = self.broadcast(&WireMessage::Bye);
        let was_ready = self.is_ready();
        self.open = false;
        for peer in std::mem::take(&mut self.peers).into_keys() {
            self.events.push(TransportEvent::PeerDisconnected { peer, state: PeerState::Closed });
        }
        if was_ready {
            self.events.push(TransportEvent::NotReady);
        }
    }

    fn stats(&self) -> TransportStats {
        TransportStats { connected: self.is_ready(), ..self.stats }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockstep::command::CommandKind;

    fn hub(names: &[&str]) -> BTreeMap<PlayerId, LoopbackTransport> {
        let ids: Vec<PlayerId> = names.iter().map(|n| PlayerId::from(*n)).collect();
        LoopbackHub::connect(&ids)
    }

    #[test]
    fn test_broadcast_in_order() {
        let mut endpoints = hub(&["a", "b", "c"]);
        let a = endpoints.get_mut(&PlayerId::from("a")).unwrap();
        assert!(a.is_ready());
        for tick in 0..5 {
            a.send_command(&Command::new(tick, "a", 0, CommandKind::Noop)).unwrap();
        }
        assert_eq!(a.stats().packets_sent, 10);

        for name in ["b", "c"] {
            let t = endpoints.get_mut(&PlayerId::from(name)).unwrap();
            let ticks: Vec<u32> = t.recv_commands().iter().map(|c| c.tick).collect();
            assert_eq!(ticks, vec![0, 1, 2, 3, 4]);
            assert_eq!(t.stats().packets_received, 5);
        }
        let a = endpoints.get_mut(&PlayerId::from("a")).unwrap();
        assert!(a.recv_commands().is_empty());
    }

    #[test]
    fn test_initial_events() {
        let mut endpoints = hub(&["a", "b"]);
        let a = endpoints.get_mut(&PlayerId::from("a")).unwrap();
        assert_eq!(
            a.poll_events(),
            vec![TransportEvent::PeerConnected { peer: "b".into() }, TransportEvent::Ready]
        );
        assert!(a.poll_events().is_empty());
    }

    #[test]
    fn test_drops_spoofed_commands() {
        let mut endpoints = hub(&["a", "b"]);
        let a = endpoints.get_mut(&PlayerId::from("a")).unwrap();
        a.send_command(&Command::noop(0, "b")).unwrap();
        let b = endpoints.get_mut(&PlayerId::from("b")).unwrap();
        assert!(b.recv_commands().is_empty());
    }

    #[test]
    fn test_disconnect_notifies_peers() {
        let mut endpoints = hub(&["a", "b"]);
        let mut a = endpoints.remove(&PlayerId::from("a")).unwrap();
        let mut b = endpoints.remove(&PlayerId::from("b")).unwrap();
        a.poll_events();
        b.poll_events();

        a.disconnect();
        assert!(!a.is_ready());
        assert!(matches!(a.send_command(&Command::noop(0, "a")), Err(TransportError::Closed)));

        assert_eq!(
            b.poll_events(),
            vec![
                TransportEvent::PeerDisconnected { peer: "a".into(), state: PeerState::Closed },
                TransportEvent::NotReady,
            ]
        );
        assert!(!b.is_ready());
        assert!(!b.stats().connected);
    }
}
