//! SoL Lockstep Demo
//!
//! Plays a scripted two-player match over the loopback transport, records it,
//! round-trips the replay through a store, plays it back and checks that the
//! final fingerprints agree.

use anyhow::{bail, Context, Result};
use std::collections::VecDeque;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sol_lockstep::{
    game::SolSimulationFactory,
    lockstep::{Faction, Participant, SessionEvent, TickOutcome},
    replay::{MemoryReplayStore, ReplayPlayer, ReplayStore},
    transport::LoopbackHub,
    CommandKind, FixedVec2, LockstepConfig, LockstepSession, MatchSetup, PlayerId, Tick, VERSION,
};

const MATCH_SEED: u32 = 12345;
const MATCH_TICKS: Tick = 120;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("SoL Lockstep v{}", VERSION);
    let config = LockstepConfig::from_env().context("invalid LOCKSTEP_* configuration")?;
    info!("Tick Rate: {} Hz, input delay {} ticks", config.tick_rate, config.input_delay_ticks);

    demo_match(config)
}

/// Per-player command script: (earliest tick, command).
fn script() -> [(&'static str, VecDeque<(Tick, CommandKind)>); 2] {
    [
        (
            "alice",
            VecDeque::from(vec![
                (5, CommandKind::ProduceUnit { unit_type: "scout".into() }),
                (10, CommandKind::UnitMove { unit_ids: vec![1], target: FixedVec2::from_ints(-200, 120) }),
                (50, CommandKind::UnitMove { unit_ids: vec![1], target: FixedVec2::from_ints(0, 0) }),
            ]),
        ),
        (
            "bob",
            VecDeque::from(vec![
                (5, CommandKind::ProduceUnit { unit_type: "heavy".into() }),
                (10, CommandKind::UnitMove { unit_ids: vec![2], target: FixedVec2::from_ints(200, -120) }),
                (30, CommandKind::PlaceMirror { position: FixedVec2::from_ints(350, 60) }),
                (50, CommandKind::UnitStop { unit_ids: vec![2] }),
            ]),
        ),
    ]
}

fn demo_match(config: LockstepConfig) -> Result<()> {
    info!("=== Starting Demo Match ===");

    let setup = MatchSetup::new(
        MATCH_SEED,
        vec![
            Participant::new("alice", Faction::Radiant, 0),
            Participant::new("bob", Faction::Aurum, 1),
        ],
    );
    let ids: Vec<PlayerId> = setup.participants.iter().map(|p| p.id.clone()).collect();
    let mut transports = LoopbackHub::connect(&ids);

    let mut peers = Vec::new();
    for (name, commands) in script() {
        let id = PlayerId::from(name);
        let transport = transports
            .remove(&id)
            .with_context(|| format!("no loopback endpoint for {}", id))?;
        let session = LockstepSession::new(id, setup.clone(), config.clone(), transport, &SolSimulationFactory)?;
        peers.push((session, commands));
    }

    let mut iterations = 0u32;
    while peers.iter().any(|(s, _)| s.current_tick() < MATCH_TICKS) {
        iterations += 1;
        if iterations > MATCH_TICKS * 50 {
            bail!("match stalled at tick {}", peers[0].0.current_tick());
        }

        for (session, commands) in peers.iter_mut() {
            if session.current_tick() >= MATCH_TICKS {
                continue;
            }
            while commands.front().map(|(t, _)| *t <= session.current_tick()).unwrap_or(false) {
                if let Some((_, kind)) = commands.pop_front() {
                    session.submit(kind)?;
                }
            }
            if let TickOutcome::Advanced(report) = session.advance()? {
                if report.tick % 30 == 0 {
                    info!(
                        peer = %session.local_id(),
                        tick = report.tick,
                        fingerprint = %report.fingerprint.short(),
                        "Tick report"
                    );
                }
            }
            for event in session.drain_events() {
                match event {
                    SessionEvent::Desync(report) => warn!(tick = report.tick, "Desync: {:?}", report.mismatched.keys()),
                    SessionEvent::TickTimedOut(timeout) => warn!(tick = timeout.tick, "Tick timed out"),
                    _ => {}
                }
            }
        }
    }

    let live: Vec<_> = peers.iter().map(|(s, _)| s.fingerprint()).collect();
    info!("=== Match Results ===");
    for (session, _) in &peers {
        let stats = session.stats();
        info!(
            peer = %session.local_id(),
            fingerprint = %session.fingerprint(),
            verified = stats.verifier.verified_ticks,
            desyncs = stats.verifier.desyncs,
            "Final state"
        );
    }
    if live.windows(2).any(|w| w[0] != w[1]) {
        bail!("peers finished with different fingerprints");
    }

    let record = peers[0]
        .0
        .end_match()
        .context("replay recording was disabled")?;
    peers[1].0.end_match();

    let store = MemoryReplayStore::new();
    let id = store.save(&record)?;
    info!(replay = %id, commands = record.commands.len(), "Replay saved");

    info!("=== Verifying Determinism ===");
    for pass in 1..=2 {
        let loaded = store.load(id)?;
        let mut player = ReplayPlayer::initialize(loaded, &SolSimulationFactory)?;
        let replayed = player.run_to_end();
        if let Some(divergence) = player.first_divergence() {
            bail!("replay pass {} diverged at tick {}", pass, divergence.tick);
        }
        if replayed != live[0] {
            bail!("replay pass {} ended at {} but live match ended at {}", pass, replayed, live[0]);
        }
        info!(
            pass,
            fingerprint = %replayed.short(),
            simulated = ?player.simulated_time(),
            checkpoints = player.checkpoint_results().len(),
            "Replay matches live match"
        );
    }

    info!("=== Demo Complete ===");
    Ok(())
}
