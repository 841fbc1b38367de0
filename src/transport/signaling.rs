//! Signaling
//!
//! Out-of-band channel used to bootstrap peer links. Delivery is assumed
//! reliable; ordering is only guaranteed per sender.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use super::TransportError;
use crate::lockstep::command::PlayerId;

/// Signaling message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Offerer opens negotiation.
    Offer,
    /// Answerer accepts.
    Answer,
    /// Where the sender can be reached.
    Candidate {
        /// Socket address (`host:port`).
        addr: String,
    },
    /// Sender is leaving.
    Bye,
}

/// Addressed signaling message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Match session.
    pub session_id: String,
    /// Sender.
    pub from: PlayerId,
    /// Recipient, or `None` for everyone in the session.
    pub to: Option<PlayerId>,
    /// Body.
    pub payload: SignalPayload,
}

impl SignalEnvelope {
    /// Message addressed to one peer.
    pub fn direct(session_id: &str, from: &PlayerId, to: &PlayerId, payload: SignalPayload) -> Self {
        Self {
            session_id: session_id.to_string(),
            from: from.clone(),
            to: Some(to.clone()),
            payload,
        }
    }
}

/// Signaling collaborator.
pub trait Signaling: Send + Sync {
    /// Deliver a message.
    fn send(&self, envelope: SignalEnvelope) -> Result<(), TransportError>;

    /// Receive messages addressed to `peer` in `session_id`.
    fn subscribe(&self, session_id: &str, peer: &PlayerId) -> mpsc::UnboundedReceiver<SignalEnvelope>;
}

enum Mailbox {
    /// Recipient has not subscribed yet.
    Waiting(Vec<SignalEnvelope>),
    Subscribed(mpsc::UnboundedSender<SignalEnvelope>),
}

/// In-process signaling hub.
///
/// Mail for peers that have not subscribed yet is held until they do.
/// Broadcasts reach only mailboxes that already exist.
#[derive(Default)]
pub struct MemorySignaling {
    mailboxes: Mutex<BTreeMap<(String, PlayerId), Mailbox>>,
}

impl MemorySignaling {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn mailboxes(&self) -> MutexGuard<'_, BTreeMap<(String, PlayerId), Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(mailbox: &mut Mailbox, envelope: SignalEnvelope) {
        match mailbox {
            Mailbox::Waiting(queue) => queue.push(envelope),
            Mailbox::Subscribed(tx) => {
                if let Err(e) = tx.send(envelope) {
                    debug!("Signaling recipient gone: {:?}", e.0.to);
                }
            }
        }
    }
}

impl Signaling for MemorySignaling {
    fn send(&self, envelope: SignalEnvelope) -> Result<(), TransportError> {
        let mut mailboxes = self.mailboxes();
        match envelope.to.clone() {
            Some(to) => {
                let mailbox = mailboxes
                    .entry((envelope.session_id.clone(), to))
                    .or_insert_with(|| Mailbox::Waiting(Vec::new()));
                Self::deliver(mailbox, envelope);
            }
            None => {
                for ((session, peer), mailbox) in mailboxes.iter_mut() {
                    if *session == envelope.session_id && *peer != envelope.from {
                        Self::deliver(mailbox, envelope.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn subscribe(&self, session_id: &str, peer: &PlayerId) -> mpsc::UnboundedReceiver<SignalEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = (session_id.to_string(), peer.clone());
        let mut mailboxes = self.mailboxes();
        if let Some(Mailbox::Waiting(queued)) = mailboxes.remove(&key) {
            for envelope in queued {
                let _ = tx.send(envelope);
            }
        }
        mailboxes.insert(key, Mailbox::Subscribed(tx));
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffers_until_subscribed() {
        let hub = MemorySignaling::new();
        let a = PlayerId::from("a");
        let b = PlayerId::from("b");
        hub.send(SignalEnvelope::direct("s1", &a, &b, SignalPayload::Offer)).unwrap();
        hub.send(SignalEnvelope::direct("s1", &a, &b, SignalPayload::Candidate { addr: "127.0.0.1:1".into() }))
            .unwrap();

        let mut rx = hub.subscribe("s1", &b);
        assert_eq!(rx.recv().await.map(|e| e.payload), Some(SignalPayload::Offer));
        assert!(matches!(rx.recv().await.map(|e| e.payload), Some(SignalPayload::Candidate { .. })));

        hub.send(SignalEnvelope::direct("s1", &a, &b, SignalPayload::Bye)).unwrap();
        assert_eq!(rx.recv().await.map(|e| e.payload), Some(SignalPayload::Bye));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let hub = MemorySignaling::new();
        let a = PlayerId::from("a");
        let b = PlayerId::from("b");
        let mut rx_other = hub.subscribe("s2", &b);
        let mut rx = hub.subscribe("s1", &b);

        hub.send(SignalEnvelope { session_id: "s1".into(), from: a, to: None, payload: SignalPayload::Answer })
            .unwrap();
        assert_eq!(rx.recv().await.map(|e| e.payload), Some(SignalPayload::Answer));
        assert!(rx_other.try_recv().is_err());
    }
}
