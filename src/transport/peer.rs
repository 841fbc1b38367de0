//! Peer-to-Peer WebSocket Transport
//!
//! Full mesh of WebSocket links, one per peer pair.
//!
//! ```text
//!   lower id (offerer)                 higher id (answerer)
//!        │ ── Offer ──────(signaling)──────► │
//!        │ ◄── Answer, Candidate{addr} ───── │
//!        │ ── ws://addr ───────────────────► │ (listener)
//!        │ ◄────────── Hello{id, digest} ──► │
//!        │ ◄═════ Batch / Ping / Pong ═════► │
//! ```
//!
//! Outbound commands pass through a batcher task that flushes every
//! `batch_window` or at `max_batch_size`. Each peer has its own outbound
//! frame channel created up front, so batches sent before the link is up are
//! held and delivered in order once it connects.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use super::batch::{FlushedBatch, OutboundBatch};
use super::signaling::{SignalEnvelope, SignalPayload, Signaling};
use super::wire::WireMessage;
use super::{PeerState, Transport, TransportError, TransportEvent, TransportStats};
use crate::config::LockstepConfig;
use crate::core::hash::Fingerprint;
use crate::lockstep::command::{Command, PlayerId};

/// Time allowed for the Hello exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer transport configuration.
#[derive(Debug, Clone)]
pub struct PeerTransportConfig {
    /// Match session (signaling namespace).
    pub session_id: String,
    /// Local peer id.
    pub local_id: PlayerId,
    /// Remote peers expected in the mesh.
    pub peers: BTreeSet<PlayerId>,
    /// Listener bind address.
    pub bind_addr: SocketAddr,
    /// Outbound batch window.
    pub batch_window: Duration,
    /// Outbound batch size cap.
    pub max_batch_size: usize,
    /// Latency probe interval.
    pub ping_interval: Duration,
    /// Lockstep policy digest; peers must match.
    pub policy_digest: Fingerprint,
}

impl PeerTransportConfig {
    /// Build from lockstep policy, listening on an ephemeral localhost port.
    pub fn from_lockstep(
        session_id: impl Into<String>,
        local_id: PlayerId,
        participants: &BTreeSet<PlayerId>,
        config: &LockstepConfig,
    ) -> Self {
        let peers = participants.iter().filter(|p| **p != local_id).cloned().collect();
        Self {
            session_id: session_id.into(),
            local_id,
            peers,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            batch_window: config.batch_window(),
            max_batch_size: config.max_batch_size,
            ping_interval: config.ping_interval(),
            policy_digest: config.policy_digest(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PeerLink {
    state: PeerState,
    latency_ms: u32,
}

/// State shared between the transport handle and its tasks.
struct Shared {
    local_id: PlayerId,
    policy_digest: Fingerprint,
    peers: Mutex<BTreeMap<PlayerId, PeerLink>>,
    /// Per-peer outbound frame receivers, claimed when a link comes up.
    pending_links: Mutex<BTreeMap<PlayerId, mpsc::UnboundedReceiver<String>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    inbound_tx: mpsc::UnboundedSender<Command>,
    ready: AtomicBool,
    started: Instant,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_out: AtomicU64,
    bytes_in: AtomicU64,
}

impl Shared {
    fn peers(&self) -> MutexGuard<'_, BTreeMap<PlayerId, PeerLink>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn state_of(&self, peer: &PlayerId) -> Option<PeerState> {
        self.peers().get(peer).map(|l| l.state)
    }

    /// Move `peer` to `state`. Terminal states are final.
    fn set_state(&self, peer: &PlayerId, state: PeerState) {
        let mut peers = self.peers();
        let Some(link) = peers.get_mut(peer) else {
            return;
        };
        if link.state == state || link.state.is_terminal() {
            return;
        }
        debug!(peer = %peer, from = ?link.state, to = ?state, "Peer state change");
        link.state = state;

        if state == PeerState::Connected {
            let _ = self.events_tx.send(TransportEvent::PeerConnected { peer: peer.clone() });
        } else if state.is_terminal() {
            let _ = self.events_tx.send(TransportEvent::PeerDisconnected { peer: peer.clone(), state });
        }

        let all_connected = peers.values().all(|l| l.state == PeerState::Connected);
        let was_ready = self.ready.swap(all_connected, Ordering::SeqCst);
        if all_connected && !was_ready {
            info!(local = %self.local_id, "All peers connected");
            let _ = self.events_tx.send(TransportEvent::Ready);
        } else if !all_connected && was_ready {
            warn!(local = %self.local_id, peer = %peer, "Lost readiness");
            let _ = self.events_tx.send(TransportEvent::NotReady);
        }
    }

    fn set_latency(&self, peer: &PlayerId, latency_ms: u32) {
        if let Some(link) = self.peers().get_mut(peer) {
            link.latency_ms = latency_ms;
        }
    }

    fn claim_link(&self, peer: &PlayerId) -> Option<mpsc::UnboundedReceiver<String>> {
        self.pending_links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer)
    }
}

/// WebSocket mesh transport.
pub struct PeerTransport {
    config: PeerTransportConfig,
    shared: Arc<Shared>,
    signaling: Arc<dyn Signaling>,
    local_addr: SocketAddr,
    outbound_tx: mpsc::UnboundedSender<Command>,
    inbound_rx: mpsc::UnboundedReceiver<Command>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    open: bool,
}

impl PeerTransport {
    /// Bind the listener, start signaling and background tasks.
    ///
    /// Returns immediately; links come up asynchronously and are reported
    /// through [`Transport::poll_events`].
    #[instrument(skip(config, signaling), fields(local = %config.local_id))]
    pub async fn connect(
        config: PeerTransportConfig,
        signaling: Arc<dyn Signaling>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Peer transport listening on {}", local_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);

        let mut frame_senders = BTreeMap::new();
        let mut pending_links = BTreeMap::new();
        let mut peers = BTreeMap::new();
        for peer in &config.peers {
            let (tx, rx) = mpsc::unbounded_channel();
            frame_senders.insert(peer.clone(), tx);
            pending_links.insert(peer.clone(), rx);
            peers.insert(peer.clone(), PeerLink { state: PeerState::Signaling, latency_ms: 0 });
        }

        let shared = Arc::new(Shared {
            local_id: config.local_id.clone(),
            policy_digest: config.policy_digest,
            peers: Mutex::new(peers),
            pending_links: Mutex::new(pending_links),
            events_tx,
            inbound_tx,
            ready: AtomicBool::new(false),
            started: Instant::now(),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
        });
        let frame_senders = Arc::new(frame_senders);

        if config.peers.is_empty() {
            shared.ready.store(true, Ordering::SeqCst);
            let _ = shared.events_tx.send(TransportEvent::Ready);
        }

        let signal_rx = signaling.subscribe(&config.session_id, &config.local_id);
        for peer in config.peers.iter().filter(|p| config.local_id < **p) {
            signaling.send(SignalEnvelope::direct(
                &config.session_id,
                &config.local_id,
                peer,
                SignalPayload::Offer,
            ))?;
        }

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_signaling(
            config.clone(),
            local_addr,
            signal_rx,
            signaling.clone(),
            shared.clone(),
            shutdown_tx.clone(),
        )));

        tasks.push(tokio::spawn(run_accept_loop(listener, shared.clone(), shutdown_tx.clone())));

        tasks.push(tokio::spawn(run_batcher(
            outbound_rx,
            OutboundBatch::new(config.batch_window, config.max_batch_size),
            frame_senders.clone(),
            shared.clone(),
        )));

        tasks.push(tokio::spawn(run_pinger(config.ping_interval, frame_senders, shared.clone())));

        Ok(Self {
            config,
            shared,
            signaling,
            local_addr,
            outbound_tx,
            inbound_rx,
            events_rx,
            shutdown_tx,
            tasks,
            open: true,
        })
    }

    /// Listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current state of one peer link.
    pub fn peer_state(&self, peer: &PlayerId) -> Option<PeerState> {
        self.shared.state_of(peer)
    }
}

impl Transport for PeerTransport {
    fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.outbound_tx
            .send(command.clone())
            .map_err(|_| TransportError::Closed)
    }

    fn recv_commands(&mut self) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = self.inbound_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn is_ready(&self) -> bool {
        self.open && self.shared.ready.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        info!(local = %self.config.local_id, "Disconnecting peer transport");

        for peer in &self.config.peers {
            let bye = SignalEnvelope::direct(&self.config.session_id, &self.config.local_id, peer, SignalPayload::Bye);
            if let Err(e) = self.signaling.send(bye) {
                debug!("Failed to signal bye to {}: {}", peer, e);
            }
            self.shared.set_state(peer, PeerState::Closed);
        }

        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn stats(&self) -> TransportStats {
        let latency_ms = self
            .shared
            .peers()
            .values()
            .map(|l| l.latency_ms)
            .max()
            .unwrap_or(0);
        TransportStats {
            connected: self.is_ready(),
            latency_ms,
            packets_sent: self.shared.packets_sent.load(Ordering::Relaxed),
            packets_received: self.shared.packets_received.load(Ordering::Relaxed),
            bytes_out: self.shared.bytes_out.load(Ordering::Relaxed),
            bytes_in: self.shared.bytes_in.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        for task in &self.tasks {
            task.abort();
        }
    }
}

// =============================================================================
// BACKGROUND TASKS
// =============================================================================

/// Handle offer/answer/candidate traffic.
async fn run_signaling(
    config: PeerTransportConfig,
    local_addr: SocketAddr,
    mut signal_rx: mpsc::UnboundedReceiver<SignalEnvelope>,
    signaling: Arc<dyn Signaling>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
) {
    while let Some(envelope) = signal_rx.recv().await {
        let peer = envelope.from.clone();
        if !config.peers.contains(&peer) {
            warn!(peer = %peer, "Signal from unexpected peer");
            continue;
        }

        match envelope.payload {
            SignalPayload::Offer => {
                shared.set_state(&peer, PeerState::Connecting);
                let answer = SignalEnvelope::direct(&config.session_id, &config.local_id, &peer, SignalPayload::Answer);
                let candidate = SignalEnvelope::direct(
                    &config.session_id,
                    &config.local_id,
                    &peer,
                    SignalPayload::Candidate { addr: local_addr.to_string() },
                );
                if let Err(e) = signaling.send(answer).and_then(|_| signaling.send(candidate)) {
                    error!(peer = %peer, "Failed to answer offer: {}", e);
                    shared.set_state(&peer, PeerState::Failed);
                }
            }
            SignalPayload::Answer => {
                debug!(peer = %peer, "Offer answered");
            }
            SignalPayload::Candidate { addr } => {
                shared.set_state(&peer, PeerState::Connecting);
                tokio::spawn(dial_peer(peer, addr, shared.clone(), shutdown_tx.subscribe()));
            }
            SignalPayload::Bye => {
                shared.set_state(&peer, PeerState::Closed);
            }
        }
    }
}

/// Dial an answerer at `addr`.
async fn dial_peer(
    peer: PlayerId,
    addr: String,
    shared: Arc<Shared>,
    shutdown_rx: broadcast::Receiver<()>,
) {
    let url = format!("ws://{}", addr);
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!(peer = %peer, "Failed to connect to {}: {}", url, e);
            shared.set_state(&peer, PeerState::Failed);
            return;
        }
    };

    match handshake(&mut ws, &shared).await {
        Ok(remote) if remote == peer => run_link(peer, ws, shared, shutdown_rx).await,
        Ok(remote) => {
            warn!(expected = %peer, got = %remote, "Dialed peer identified as someone else");
            shared.set_state(&peer, PeerState::Failed);
        }
        Err(e) => {
            warn!(peer = %peer, "Handshake failed: {}", e);
            shared.set_state(&peer, PeerState::Failed);
        }
    }
}

/// Accept links from offerers.
async fn run_accept_loop(listener: TcpListener, shared: Arc<Shared>, shutdown_tx: broadcast::Sender<()>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept error: {}", e);
                continue;
            }
        };
        debug!("Inbound connection from {}", addr);

        let shared = shared.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            match handshake(&mut ws, &shared).await {
                Ok(peer) => {
                    if shared.state_of(&peer).is_none() {
                        warn!(peer = %peer, "Rejecting link from unexpected peer");
                        let _ = ws.close(None).await;
                        return;
                    }
                    run_link(peer, ws, shared, shutdown_rx).await;
                }
                Err(TransportError::PolicyMismatch(peer)) => {
                    warn!(peer = %peer, "Rejecting peer with different lockstep policy");
                    shared.set_state(&peer, PeerState::Failed);
                }
                Err(e) => warn!("Inbound handshake from {} failed: {}", addr, e),
            }
        });
    }
}

/// Exchange Hello frames. Returns the remote peer id.
async fn handshake<S>(ws: &mut WebSocketStream<S>, shared: &Shared) -> Result<PlayerId, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = WireMessage::Hello {
        peer_id: shared.local_id.clone(),
        policy_digest: shared.policy_digest,
    };
    ws.send(Message::Text(hello.to_json()?)).await?;

    let reply = timeout(HANDSHAKE_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return WireMessage::from_json(&text).map_err(TransportError::from),
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    })
    .await
    .map_err(|_| TransportError::Handshake("timed out waiting for hello".into()))??;

    match reply {
        WireMessage::Hello { peer_id, policy_digest } => {
            if policy_digest != shared.policy_digest {
                let _ = ws.close(None).await;
                return Err(TransportError::PolicyMismatch(peer_id));
            }
            Ok(peer_id)
        }
        other => Err(TransportError::Handshake(format!("expected hello, got {:?}", other))),
    }
}

/// Pump one established link until it closes.
async fn run_link<S>(
    peer: PlayerId,
    ws: WebSocketStream<S>,
    shared: Arc<Shared>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(mut frames_rx) = shared.claim_link(&peer) else {
        warn!(peer = %peer, "Duplicate link ignored");
        return;
    };
    let (mut ws_sender, mut ws_receiver) = ws.split();
    shared.set_state(&peer, PeerState::Connected);

    let final_state = loop {
        tokio::select! {
            frame = frames_rx.recv() => {
                let Some(text) = frame else {
                    break PeerState::Closed;
                };
                if ws_sender.send(Message::Text(text)).await.is_err() {
                    break PeerState::Disconnected;
                }
            }
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        shared.packets_received.fetch_add(1, Ordering::Relaxed);
                        shared.bytes_in.fetch_add(text.len() as u64, Ordering::Relaxed);
                        match WireMessage::from_json(&text) {
                            Ok(WireMessage::Batch { sender, commands, .. }) => {
                                for command in commands {
                                    if command.originator != peer || sender != peer {
                                        warn!(peer = %peer, originator = %command.originator, "Dropping spoofed command");
                                        continue;
                                    }
                                    let _ = shared.inbound_tx.send(command);
                                }
                            }
                            Ok(WireMessage::Ping { sent_at_ms }) => {
                                let pong = WireMessage::Pong { sent_at_ms };
                                if let Ok(text) = pong.to_json() {
                                    if ws_sender.send(Message::Text(text)).await.is_err() {
                                        break PeerState::Disconnected;
                                    }
                                }
                            }
                            Ok(WireMessage::Pong { sent_at_ms }) => {
                                let rtt = shared.elapsed_ms().saturating_sub(sent_at_ms);
                                shared.set_latency(&peer, rtt.min(u32::MAX as u64) as u32);
                            }
                            Ok(WireMessage::Bye) => break PeerState::Closed,
                            Ok(WireMessage::Hello { .. }) => debug!(peer = %peer, "Repeated hello ignored"),
                            Err(e) => warn!(peer = %peer, "Malformed frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break PeerState::Disconnected,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(peer = %peer, "WebSocket error: {}", e);
                        break PeerState::Disconnected;
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                if let Ok(text) = WireMessage::Bye.to_json() {
                    let _ = ws_sender.send(Message::Text(text)).await;
                }
                let _ = ws_sender.close().await;
                break PeerState::Closed;
            }
        }
    };

    info!(peer = %peer, state = ?final_state, "Peer link ended");
    shared.set_state(&peer, final_state);
}

/// Collect outbound commands into batches and fan them out.
async fn run_batcher(
    mut outbound_rx: mpsc::UnboundedReceiver<Command>,
    mut batch: OutboundBatch,
    frame_senders: Arc<BTreeMap<PlayerId, mpsc::UnboundedSender<String>>>,
    shared: Arc<Shared>,
) {
    loop {
        let flushed = match batch.deadline() {
            Some(deadline) => {
                tokio::select! {
                    command = outbound_rx.recv() => match command {
                        Some(command) => batch.push(command, Instant::now()),
                        None => break,
                    },
                    _ = sleep_until(deadline.into()) => batch.take(),
                }
            }
            None => match outbound_rx.recv().await {
                Some(command) => batch.push(command, Instant::now()),
                None => break,
            },
        };

        if let Some(flushed) = flushed {
            fan_out(&flushed, &frame_senders, &shared);
        }
    }

    if let Some(flushed) = batch.take() {
        fan_out(&flushed, &frame_senders, &shared);
    }
}

fn fan_out(
    flushed: &FlushedBatch,
    frame_senders: &BTreeMap<PlayerId, mpsc::UnboundedSender<String>>,
    shared: &Shared,
) {
    let message = WireMessage::Batch {
        sender: shared.local_id.clone(),
        seq: flushed.seq,
        commands: flushed.commands.clone(),
    };
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize batch: {}", e);
            return;
        }
    };
    for (peer, tx) in frame_senders {
        if tx.send(text.clone()).is_ok() {
            shared.packets_sent.fetch_add(1, Ordering::Relaxed);
            shared.bytes_out.fetch_add(text.len() as u64, Ordering::Relaxed);
        } else {
            debug!(peer = %peer, "Batch dropped, link gone");
        }
    }
}

/// Probe latency of connected peers.
async fn run_pinger(
    every: Duration,
    frame_senders: Arc<BTreeMap<PlayerId, mpsc::UnboundedSender<String>>>,
    shared: Arc<Shared>,
) {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    loop {
        ticker.tick().await;
        let ping = WireMessage::Ping { sent_at_ms: shared.elapsed_ms() };
        let Ok(text) = ping.to_json() else {
            continue;
        };
        for (peer, tx) in frame_senders.iter() {
            if shared.state_of(peer) == Some(PeerState::Connected) {
                let _ = tx.send(text.clone());
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
