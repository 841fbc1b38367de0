//! Lockstep Session
//!
//! Drives one match: collects local input, exchanges it through the
//! transport, releases complete ticks to the simulation, records them, and
//! cross-checks fingerprints with peers. The embedding game loop calls
//! [`LockstepSession::advance`] once per frame; it never blocks.

use std::collections::VecDeque;
use tracing::{debug, info, warn};

use super::command::{Command, CommandKind, PlayerId, Tick};
use super::queue::{CommandQueue, QueueStats, TickTimeout};
use super::setup::MatchSetup;
use super::simulation::{Simulation, SimulationFactory};
use super::validator::{CommandValidator, Rejection, ValidatorStats};
use super::verifier::{DesyncReport, FingerprintReport, StateVerifier, VerificationEvent, VerifierStats};
use crate::config::{ConfigError, LockstepConfig};
use crate::core::hash::Fingerprint;
use crate::replay::{ReplayRecord, ReplayRecorder};
use crate::transport::{PeerState, Transport, TransportError, TransportEvent, TransportStats};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for every peer to connect.
    Waiting,
    /// Ticks are being simulated.
    Running,
    /// Match over; the session cannot resume.
    Ended,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The match has ended.
    #[error("Session has ended")]
    Ended,

    /// A local command failed validation.
    #[error("Command rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Events for the embedding application, in the order they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// States diverged.
    Desync(DesyncReport),
    /// Every peer agreed on a tick's fingerprint.
    Verified {
        /// Verified tick.
        tick: Tick,
    },
    /// A peer link came up.
    PeerConnected {
        /// Peer.
        peer: PlayerId,
    },
    /// A peer link went down.
    PeerDisconnected {
        /// Peer.
        peer: PlayerId,
        /// Terminal link state.
        state: PeerState,
    },
    /// Every peer connected.
    Ready,
    /// A peer is no longer connected.
    NotReady,
    /// A tick was released without every participant's input.
    TickTimedOut(TickTimeout),
}

/// Result of simulating one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick simulated.
    pub tick: Tick,
    /// Fingerprint after the tick.
    pub fingerprint: Fingerprint,
    /// Commands applied, including idle sentinels.
    pub command_count: usize,
    /// Whether the tick was released after the timeout.
    pub timed_out: bool,
}

/// What one call to [`LockstepSession::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Transport not ready yet; nothing simulated.
    Waiting,
    /// Still collecting input for `tick`.
    Stalled {
        /// Tick being waited on.
        tick: Tick,
    },
    /// A tick was simulated.
    Advanced(TickReport),
}

/// Combined counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Queue counters.
    pub queue: QueueStats,
    /// Validator counters.
    pub validator: ValidatorStats,
    /// Verifier counters.
    pub verifier: VerifierStats,
    /// Transport counters.
    pub transport: TransportStats,
}

/// A lockstep match from one peer's point of view.
pub struct LockstepSession<S: Simulation, T: Transport> {
    local_id: PlayerId,
    state: SessionState,
    config: LockstepConfig,
    transport: T,
    sim: S,
    validator: CommandValidator,
    queue: CommandQueue,
    verifier: StateVerifier,
    recorder: Option<ReplayRecorder>,
    /// Local commands not yet assigned a tick.
    staged: VecDeque<CommandKind>,
    /// Next tick local input will be issued for.
    issue_frontier: Tick,
    events: Vec<SessionEvent>,
}

impl<S: Simulation, T: Transport> LockstepSession<S, T> {
    /// Create a session for `local_id` over an already connecting transport.
    pub fn new<F>(
        local_id: impl Into<PlayerId>,
        setup: MatchSetup,
        config: LockstepConfig,
        transport: T,
        factory: &F,
    ) -> Result<Self, SessionError>
    where
        F: SimulationFactory<Sim = S>,
    {
        config.validate()?;
        let local_id = local_id.into();
        let participants = setup.participant_ids();
        let sim = factory.create(&setup);
        let recorder = config
            .record_replay
            .then(|| ReplayRecorder::start(setup.clone(), config.tick_rate));

        info!(
            local = %local_id,
            participants = participants.len(),
            seed = setup.seed,
            "Lockstep session created"
        );

        Ok(Self {
            validator: CommandValidator::new(&config),
            queue: CommandQueue::new(participants.clone(), &config),
            verifier: StateVerifier::new(local_id.clone(), &participants, config.verification_horizon_ticks),
            local_id,
            state: SessionState::Waiting,
            config,
            transport,
            sim,
            recorder,
            staged: VecDeque::new(),
            issue_frontier: 0,
            events: Vec::new(),
        })
    }

    /// Stage a local command for the next tick that has not been issued yet.
    pub fn submit(&mut self, kind: CommandKind) -> Result<(), SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::Ended);
        }
        let candidate = Command::new(self.issue_frontier, self.local_id.clone(), 0, kind);
        self.validator.inspect(&candidate)?;
        self.staged.push_back(candidate.kind);
        Ok(())
    }

    /// Run one iteration of the lockstep loop.
    pub fn advance(&mut self) -> Result<TickOutcome, SessionError> {
        if self.state == SessionState::Ended {
            return Err(SessionError::Ended);
        }

        self.pump_transport();

        if self.state == SessionState::Waiting {
            if !self.transport.is_ready() {
                return Ok(TickOutcome::Waiting);
            }
            info!(local = %self.local_id, "All peers connected, starting lockstep");
            self.state = SessionState::Running;
        }

        self.issue_local_input()?;

        let tick = self.queue.current_tick();
        let timeouts_before = self.queue.stats().timed_out_ticks;
        let Some(commands) = self.queue.next_tick_commands() else {
            return Ok(TickOutcome::Stalled { tick });
        };

        let timed_out = self.queue.stats().timed_out_ticks > timeouts_before;
        if timed_out {
            if let Some(timeout) = self.queue.last_timeout() {
                self.events.push(SessionEvent::TickTimedOut(timeout.clone()));
            }
        }

        self.sim.advance(self.config.tick_delta(), &commands);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record_tick(tick, &commands);
        }
        let fingerprint = self.sim.fingerprint();

        if tick % self.config.verify_interval_ticks.max(1) == 0 {
            let report = self.verifier.record_local(tick, fingerprint);
            self.transport.send_command(&report.to_command())?;
        }
        if tick % self.config.checkpoint_interval_ticks.max(1) == 0 {
            if let Some(recorder) = self.recorder.as_mut() {
                recorder.record_checkpoint(tick, fingerprint);
            }
        }

        self.verifier.sweep(self.queue.current_tick());
        self.collect_verification();

        debug!(tick, commands = commands.len(), fingerprint = %fingerprint.short(), "Tick simulated");
        Ok(TickOutcome::Advanced(TickReport {
            tick,
            fingerprint,
            command_count: commands.len(),
            timed_out,
        }))
    }

    fn pump_transport(&mut self) {
        for event in self.transport.poll_events() {
            self.events.push(match event {
                TransportEvent::PeerConnected { peer } => SessionEvent::PeerConnected { peer },
                TransportEvent::PeerDisconnected { peer, state } => {
                    warn!(local = %self.local_id, peer = %peer, ?state, "Peer disconnected");
                    SessionEvent::PeerDisconnected { peer, state }
                }
                TransportEvent::Ready => SessionEvent::Ready,
                TransportEvent::NotReady => SessionEvent::NotReady,
            });
        }

        for command in self.transport.recv_commands() {
            if command.originator == self.local_id {
                debug!(tick = command.tick, "Ignoring echo of local command");
                continue;
            }
            if let Some(report) = FingerprintReport::from_command(&command) {
                self.verifier.receive_remote(report);
                continue;
            }
            if self.validator.validate(&command) {
                self.queue.add_command(command);
            }
        }
        self.collect_verification();
    }

    /// Issue local input for every tick up to the input-delay horizon, once each.
    fn issue_local_input(&mut self) -> Result<(), SessionError> {
        let horizon = self.queue.current_tick() + self.config.input_delay_ticks;
        let per_tick = self.config.commands_per_tick_limit.max(1) as usize;

        while self.issue_frontier <= horizon {
            let tick = self.issue_frontier;
            let take = self.staged.len().min(per_tick);
            let mut kinds: Vec<CommandKind> = self.staged.drain(..take).collect();
            if kinds.is_empty() {
                kinds.push(CommandKind::Noop);
            }

            // The tick counts as issued even if a send fails; unsent input is
            // staged again for the next tick.
            self.issue_frontier += 1;
            let mut kinds = kinds.into_iter().enumerate();
            while let Some((sequence, kind)) = kinds.next() {
                let command = Command::new(tick, self.local_id.clone(), sequence as u32, kind);
                if !self.validator.validate(&command) {
                    continue;
                }
                if let Err(err) = self.transport.send_command(&command) {
                    let unsent: Vec<CommandKind> = std::iter::once(command.kind)
                        .chain(kinds.map(|(_, kind)| kind))
                        .filter(|kind| *kind != CommandKind::Noop)
                        .collect();
                    warn!(local = %self.local_id, tick, unsent = unsent.len(), error = %err, "Failed to send local input");
                    for kind in unsent.into_iter().rev() {
                        self.staged.push_front(kind);
                    }
                    return Err(err.into());
                }
                self.queue.add_command(command);
            }
        }
        Ok(())
    }

    fn collect_verification(&mut self) {
        for event in self.verifier.drain_events() {
            self.events.push(match event {
                VerificationEvent::Verified { tick } => SessionEvent::Verified { tick },
                VerificationEvent::Desync(report) => SessionEvent::Desync(report),
            });
        }
    }

    /// Take pending events.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Stop waiting on a participant that left. Returns whether it was expected.
    pub fn remove_participant(&mut self, peer: &PlayerId) -> bool {
        let removed = self.queue.remove_participant(peer);
        if removed {
            info!(local = %self.local_id, peer = %peer, tick = self.queue.current_tick(), "Participant removed");
            self.verifier.remove_participant(peer);
            self.collect_verification();
        }
        removed
    }

    /// End the match: tear down links, drop queued input, return the replay.
    ///
    /// Returns `None` if recording was disabled or the match already ended.
    pub fn end_match(&mut self) -> Option<ReplayRecord> {
        if self.state == SessionState::Ended {
            return None;
        }
        self.state = SessionState::Ended;
        self.transport.disconnect();
        self.queue.clear();
        self.validator.clear();
        self.staged.clear();

        let ticks = self.queue.current_tick();
        info!(local = %self.local_id, ticks, "Match ended");

        let mut recorder = self.recorder.take()?;
        if recorder.end_tick() > 0 {
            recorder.record_checkpoint(recorder.end_tick() - 1, self.sim.fingerprint());
        }
        Some(recorder.stop())
    }

    /// Local id.
    pub fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    /// Session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Next tick to simulate.
    pub fn current_tick(&self) -> Tick {
        self.queue.current_tick()
    }

    /// Participants still expected each tick.
    pub fn participants(&self) -> Vec<PlayerId> {
        self.queue.participants().iter().cloned().collect()
    }

    /// The simulation.
    pub fn simulation(&self) -> &S {
        &self.sim
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        self.sim.fingerprint()
    }

    /// Counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            queue: self.queue.stats(),
            validator: self.validator.stats(),
            verifier: self.verifier.stats(),
            transport: self.transport.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::Fixed;
    use crate::core::hash::hash_with_domain;
    use crate::game::sim::{SolSimulation, SolSimulationFactory};
    use crate::lockstep::setup::{Faction, Participant};
    use crate::core::vec2::FixedVec2;
    use crate::transport::{LoopbackHub, LoopbackTransport};

    fn setup(names: &[&str]) -> MatchSetup {
        let participants = names
            .iter()
            .enumerate()
            .map(|(slot, name)| Participant::new(*name, Faction::Radiant, slot as u8))
            .collect();
        MatchSetup::new(12345, participants)
    }

    fn config() -> LockstepConfig {
        LockstepConfig { verify_interval_ticks: 5, checkpoint_interval_ticks: 10, ..Default::default() }
    }

    fn sessions<S, F>(names: &[&str], factory: &F) -> Vec<LockstepSession<S, LoopbackTransport>>
    where
        S: Simulation,
        F: SimulationFactory<Sim = S>,
    {
        let setup = setup(names);
        let ids: Vec<PlayerId> = names.iter().map(|n| PlayerId::from(*n)).collect();
        let mut transports = LoopbackHub::connect(&ids);
        ids.iter()
            .map(|id| {
                let transport = transports.remove(id).unwrap();
                LockstepSession::new(id.clone(), setup.clone(), config(), transport, factory).unwrap()
            })
            .collect()
    }

    fn run_until<S: Simulation>(sessions: &mut [LockstepSession<S, LoopbackTransport>], tick: Tick) {
        for _ in 0..(tick * 20) {
            if sessions.iter().all(|s| s.current_tick() >= tick) {
                return;
            }
            for session in sessions.iter_mut() {
                if session.current_tick() < tick {
                    session.advance().unwrap();
                }
            }
        }
        panic!("sessions did not reach tick {}", tick);
    }

    #[test]
    fn test_peers_stay_in_sync() {
        let mut sessions = sessions(&["alice", "bob"], &SolSimulationFactory);
        sessions[0].submit(CommandKind::ProduceUnit { unit_type: "scout".into() }).unwrap();
        sessions[1].submit(CommandKind::PlaceMirror { position: FixedVec2::from_ints(10, 10) }).unwrap();

        run_until(&mut sessions, 40);
        assert_eq!(sessions[0].fingerprint(), sessions[1].fingerprint());
        assert_eq!(sessions[0].simulation().state().tick, 40);

        let events = sessions[0].drain_events();
        assert!(events.contains(&SessionEvent::Ready));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Verified { .. })));
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Desync(_))));
        assert_eq!(sessions[0].stats().queue.timed_out_ticks, 0);
    }

    #[test]
    fn test_waits_for_transport() {
        let ids = vec![PlayerId::from("alice"), PlayerId::from("bob")];
        let mut transports = LoopbackHub::connect(&ids);
        let mut bob = transports.remove(&ids[1]).unwrap();
        bob.disconnect();
        let alice = transports.remove(&ids[0]).unwrap();

        let mut session: LockstepSession<SolSimulation, _> =
            LockstepSession::new("alice", setup(&["alice", "bob"]), config(), alice, &SolSimulationFactory).unwrap();
        assert_eq!(session.advance().unwrap(), TickOutcome::Waiting);
        assert_eq!(session.state(), SessionState::Waiting);
    }

    #[test]
    fn test_missing_peer_times_out_then_removed() {
        let mut sessions = sessions(&["alice", "bob"], &SolSimulationFactory);
        let mut alice = sessions.remove(0);

        let mut outcomes = Vec::new();
        for _ in 0..config().command_timeout_ticks {
            outcomes.push(alice.advance().unwrap());
        }
        assert!(outcomes[..outcomes.len() - 1]
            .iter()
            .all(|o| *o == TickOutcome::Stalled { tick: 0 }));
        assert!(matches!(outcomes.last(), Some(TickOutcome::Advanced(r)) if r.timed_out && r.tick == 0));
        assert!(alice
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::TickTimedOut(t) if t.missing == vec![PlayerId::from("bob")])));

        assert!(alice.remove_participant(&PlayerId::from("bob")));
        assert!(matches!(alice.advance().unwrap(), TickOutcome::Advanced(r) if !r.timed_out));
    }

    #[test]
    fn test_rejects_oversized_submit() {
        let mut sessions = sessions(&["alice", "bob"], &SolSimulationFactory);
        let err = sessions[0]
            .submit(CommandKind::UnitStop { unit_ids: (0..1_000).collect() })
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(_)));
    }

    #[test]
    fn test_end_match_returns_replay() {
        let mut sessions = sessions(&["alice", "bob"], &SolSimulationFactory);
        sessions[0].submit(CommandKind::ProduceUnit { unit_type: "scout".into() }).unwrap();
        run_until(&mut sessions, 25);

        let record = sessions[0].end_match().unwrap();
        assert_eq!(record.end_tick, 25);
        // One command per participant per tick: the production plus sentinels.
        assert_eq!(record.commands.len(), 50);
        assert_eq!(record.commands.iter().filter(|c| c.kind != CommandKind::Noop).count(), 1);
        assert_eq!(record.checkpoints.last().map(|c| c.tick), Some(24));
        assert!(record.validate().is_ok());

        assert!(sessions[0].end_match().is_none());
        assert!(matches!(sessions[0].advance(), Err(SessionError::Ended)));
        assert!(matches!(sessions[0].submit(CommandKind::Noop), Err(SessionError::Ended)));

        sessions[1].advance().unwrap();
        let events = sessions[1].drain_events();
        assert!(events.contains(&SessionEvent::PeerDisconnected {
            peer: "alice".into(),
            state: PeerState::Closed
        }));
    }

    /// Loopback link whose `fail_at`-th send fails.
    struct FlakyTransport {
        inner: LoopbackTransport,
        sends: usize,
        fail_at: usize,
    }

    impl Transport for FlakyTransport {
        fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
            self.sends += 1;
            if self.sends == self.fail_at {
                return Err(TransportError::Closed);
            }
            self.inner.send_command(command)
        }

        fn recv_commands(&mut self) -> Vec<Command> {
            self.inner.recv_commands()
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            self.inner.poll_events()
        }

        fn is_ready(&self) -> bool {
            self.inner.is_ready()
        }

        fn disconnect(&mut self) {
            self.inner.disconnect()
        }

        fn stats(&self) -> TransportStats {
            self.inner.stats()
        }
    }

    #[test]
    fn test_failed_send_restages_unsent_input() {
        let ids = vec![PlayerId::from("alice"), PlayerId::from("bob")];
        let mut transports = LoopbackHub::connect(&ids);
        let mut bob = transports.remove(&ids[1]).unwrap();
        let inner = transports.remove(&ids[0]).unwrap();
        let flaky = FlakyTransport { inner, sends: 0, fail_at: 2 };

        let mut alice: LockstepSession<SolSimulation, _> =
            LockstepSession::new("alice", setup(&["alice", "bob"]), config(), flaky, &SolSimulationFactory).unwrap();
        let mirror = CommandKind::PlaceMirror { position: FixedVec2::from_ints(5, 5) };
        alice.submit(CommandKind::ProduceUnit { unit_type: "scout".into() }).unwrap();
        alice.submit(mirror.clone()).unwrap();

        assert!(matches!(alice.advance(), Err(SessionError::Transport(TransportError::Closed))));
        assert_eq!(alice.issue_frontier, 1);
        assert_eq!(alice.staged, VecDeque::from(vec![mirror.clone()]));

        assert_eq!(alice.advance().unwrap(), TickOutcome::Stalled { tick: 0 });
        assert!(alice.staged.is_empty());
        assert_eq!(alice.stats().queue.duplicates, 0);

        let sent: Vec<(Tick, u32, CommandKind)> = bob
            .recv_commands()
            .into_iter()
            .map(|c| (c.tick, c.sequence, c.kind))
            .collect();
        assert_eq!(
            sent,
            vec![
                (0, 0, CommandKind::ProduceUnit { unit_type: "scout".into() }),
                (1, 0, mirror),
                (2, 0, CommandKind::Noop),
            ]
        );
    }

    /// Counts commands; one instance can be biased to diverge.
    struct Counter {
        tick: Tick,
        total: u64,
        bias: u64,
    }

    impl Simulation for Counter {
        fn advance(&mut self, _dt: Fixed, commands: &[Command]) {
            self.total += commands.len() as u64 + self.bias;
            self.tick += 1;
        }

        fn fingerprint(&self) -> Fingerprint {
            hash_with_domain(b"counter", &self.total.to_le_bytes())
        }

        fn tick(&self) -> Tick {
            self.tick
        }
    }

    struct CounterFactory {
        biased: Option<PlayerId>,
    }

    impl SimulationFactory for CounterFactory {
        type Sim = Counter;

        fn create(&self, _setup: &MatchSetup) -> Counter {
            Counter { tick: 0, total: 0, bias: 0 }
        }
    }

    #[test]
    fn test_desync_names_the_dissenter() {
        let names = ["alice", "bob", "carol"];
        let setup = setup(&names);
        let ids: Vec<PlayerId> = names.iter().map(|n| PlayerId::from(*n)).collect();
        let mut transports = LoopbackHub::connect(&ids);
        let factory = CounterFactory { biased: Some("carol".into()) };

        let mut sessions: Vec<_> = ids
            .iter()
            .map(|id| {
                let transport = transports.remove(id).unwrap();
                let mut session = LockstepSession::new(id.clone(), setup.clone(), config(), transport, &factory).unwrap();
                if factory.biased.as_ref() == Some(id) {
                    session.sim.bias = 1;
                }
                session
            })
            .collect();

        run_until(&mut sessions, 12);
        for session in sessions.iter_mut() {
            session.advance().unwrap();
        }

        let desyncs: Vec<DesyncReport> = sessions[0]
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Desync(report) => Some(report),
                _ => None,
            })
            .collect();
        // Tick 0 already diverges; every verified tick after it does too.
        assert!(!desyncs.is_empty());
        let first = &desyncs[0];
        assert_eq!(first.tick, 0);
        let dissenters: Vec<&PlayerId> = first.mismatched.keys().collect();
        assert_eq!(dissenters, vec![&PlayerId::from("carol")]);
    }
}
