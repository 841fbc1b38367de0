//! State Verifier
//!
//! Peers periodically exchange state fingerprints. Once every expected
//! participant has reported for a tick, each remote fingerprint is compared
//! with the local one. Disagreement raises a desync naming exactly the peers
//! that differ; agreement raises a verified event. Reports older than the
//! verification horizon are dropped unresolved.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use super::command::{Command, CommandKind, PlayerId, Tick};
use crate::core::hash::Fingerprint;

/// A fingerprint claim for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintReport {
    /// Tick the fingerprint was taken after.
    pub tick: Tick,
    /// Reporting peer.
    pub originator: PlayerId,
    /// State fingerprint.
    pub fingerprint: Fingerprint,
}

impl FingerprintReport {
    /// Wrap as a command for the transport.
    pub fn to_command(&self) -> Command {
        Command::new(
            self.tick,
            self.originator.clone(),
            0,
            CommandKind::StateFingerprint { fingerprint: self.fingerprint },
        )
    }

    /// Extract from a `StateFingerprint` command.
    pub fn from_command(command: &Command) -> Option<Self> {
        match &command.kind {
            CommandKind::StateFingerprint { fingerprint } => Some(Self {
                tick: command.tick,
                originator: command.originator.clone(),
                fingerprint: *fingerprint,
            }),
            _ => None,
        }
    }
}

/// Diagnostic payload of a detected divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesyncReport {
    /// Tick at which states diverged.
    pub tick: Tick,
    /// Local fingerprint.
    pub local: Fingerprint,
    /// Peers whose fingerprint differs, with what they reported.
    pub mismatched: BTreeMap<PlayerId, Fingerprint>,
}

/// Verifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationEvent {
    /// Every participant agreed.
    Verified {
        /// Verified tick.
        tick: Tick,
    },
    /// At least one peer disagreed.
    Desync(DesyncReport),
}

/// Verifier counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifierStats {
    /// Ticks where everyone agreed.
    pub verified_ticks: u64,
    /// Ticks with a mismatch.
    pub desyncs: u64,
    /// Ticks pruned before every report arrived.
    pub unverified_ticks: u64,
    /// Remote reports dropped for being beyond the horizon ahead.
    pub future_reports: u64,
}

#[derive(Debug, Default)]
struct PendingTick {
    local: Option<Fingerprint>,
    remote: BTreeMap<PlayerId, Fingerprint>,
}

/// Fingerprint exchange and comparison.
#[derive(Debug)]
pub struct StateVerifier {
    local_id: PlayerId,
    /// Remote peers that must report.
    remotes: BTreeSet<PlayerId>,
    pending: BTreeMap<Tick, PendingTick>,
    resolved: BTreeSet<Tick>,
    /// Latest tick passed to `sweep`.
    current_tick: Tick,
    horizon_ticks: u32,
    events: Vec<VerificationEvent>,
    stats: VerifierStats,
}

impl StateVerifier {
    /// Create a verifier. `participants` may include the local id.
    pub fn new(local_id: PlayerId, participants: &BTreeSet<PlayerId>, horizon_ticks: u32) -> Self {
        let remotes = participants.iter().filter(|p| **p != local_id).cloned().collect();
        Self {
            local_id,
            remotes,
            pending: BTreeMap::new(),
            resolved: BTreeSet::new(),
            current_tick: 0,
            horizon_ticks,
            events: Vec::new(),
            stats: VerifierStats::default(),
        }
    }

    /// Record the local fingerprint and return the report to broadcast.
    pub fn record_local(&mut self, tick: Tick, fingerprint: Fingerprint) -> FingerprintReport {
        if !self.resolved.contains(&tick) {
            self.pending.entry(tick).or_default().local = Some(fingerprint);
            self.try_resolve(tick);
        }
        FingerprintReport { tick, originator: self.local_id.clone(), fingerprint }
    }

    /// Record a fingerprint from a peer.
    pub fn receive_remote(&mut self, report: FingerprintReport) {
        let FingerprintReport { tick, originator, fingerprint } = report;

        if originator == self.local_id || !self.remotes.contains(&originator) {
            debug!(tick, peer = %originator, "Ignoring fingerprint from non-participant");
            return;
        }
        if tick > self.current_tick.saturating_add(self.horizon_ticks) {
            self.stats.future_reports += 1;
            debug!(tick, current = self.current_tick, peer = %originator, "Ignoring fingerprint too far ahead");
            return;
        }
        if self.resolved.contains(&tick) {
            return;
        }
        self.pending
            .entry(tick)
            .or_default()
            .remote
            .entry(originator)
            .or_insert(fingerprint);
        self.try_resolve(tick);
    }

    fn try_resolve(&mut self, tick: Tick) {
        let Some(entry) = self.pending.get(&tick) else {
            return;
        };
        let Some(local) = entry.local else {
            return;
        };
        if !self.remotes.iter().all(|p| entry.remote.contains_key(p)) {
            return;
        }

        let mismatched: BTreeMap<PlayerId, Fingerprint> = entry
            .remote
            .iter()
            .filter(|(peer, fp)| self.remotes.contains(*peer) && **fp != local)
            .map(|(peer, fp)| (peer.clone(), *fp))
            .collect();

        self.pending.remove(&tick);
        self.resolved.insert(tick);

        if mismatched.is_empty() {
            self.stats.verified_ticks += 1;
            debug!(tick, fingerprint = %local.short(), "State verified");
            self.events.push(VerificationEvent::Verified { tick });
        } else {
            self.stats.desyncs += 1;
            let peers: Vec<&PlayerId> = mismatched.keys().collect();
            warn!(tick, local = %local.short(), peers = ?peers, "Desync detected");
            self.events.push(VerificationEvent::Desync(DesyncReport { tick, local, mismatched }));
        }
    }

    /// Drop everything older than the horizon behind `current_tick`.
    pub fn sweep(&mut self, current_tick: Tick) {
        self.current_tick = self.current_tick.max(current_tick);
        let cutoff = current_tick.saturating_sub(self.horizon_ticks);
        let keep = self.pending.split_off(&cutoff);
        let dropped = std::mem::replace(&mut self.pending, keep);
        if !dropped.is_empty() {
            self.stats.unverified_ticks += dropped.len() as u64;
            info!(count = dropped.len(), cutoff, "Pruned unverified fingerprints");
        }
        self.resolved = self.resolved.split_off(&cutoff);
    }

    /// Stop waiting on a departed peer. May resolve pending ticks.
    pub fn remove_participant(&mut self, peer: &PlayerId) {
        if self.remotes.remove(peer) {
            let ticks: Vec<Tick> = self.pending.keys().copied().collect();
            for tick in ticks {
                self.try_resolve(tick);
            }
        }
    }

    /// Take pending events.
    pub fn drain_events(&mut self) -> Vec<VerificationEvent> {
        std::mem::take(&mut self.events)
    }

    /// Ticks awaiting reports.
    pub fn pending_ticks(&self) -> usize {
        self.pending.len()
    }

    /// Counters.
    pub fn stats(&self) -> VerifierStats {
        self.stats
    }
}
