//! SoL Reference Simulation
//!
//! Applies commands in the order given, moves units, and turns sunlight into
//! Solarium. Invalid or unaffordable commands are ignored deterministically.

use std::collections::BTreeMap;
use tracing::debug;

use super::state::{
    PlayerState, SolState, SolarMirror, StellarForge, Unit, UnitType, FORGE_HEALTH,
    MAX_MIRRORS, MIRROR_COST, SOLARIUM_CAP, SOL_PER_SECOND, SPAWN_RADIUS, STARTING_SOLARIUM,
};
use crate::core::fixed::{fixed_mul, Fixed};
use crate::core::hash::Fingerprint;
use crate::core::rng::RngSlot;
use crate::core::vec2::FixedVec2;
use crate::lockstep::command::{Command, CommandKind, PlayerId, Tick, UnitId};
use crate::lockstep::setup::MatchSetup;
use crate::lockstep::simulation::{Simulation, SimulationFactory};

/// Forge and starting mirror positions per slot.
const STARTING_POSITIONS: [((i32, i32), [(i32, i32); 2]); 4] = [
    ((-500, 0), [(-450, 0), (-400, 0)]),
    ((500, 0), [(450, 0), (400, 0)]),
    ((0, -500), [(0, -450), (0, -400)]),
    ((0, 500), [(0, 450), (0, 400)]),
];

/// The reference SoL simulation.
#[derive(Debug, Clone)]
pub struct SolSimulation {
    state: SolState,
}

impl SolSimulation {
    /// Build the tick-zero state for `setup`.
    pub fn new(setup: &MatchSetup) -> Self {
        let mut players = BTreeMap::new();
        for participant in &setup.participants {
            let (forge_pos, mirror_pos) =
                STARTING_POSITIONS[participant.slot as usize % STARTING_POSITIONS.len()];
            let mirrors = mirror_pos
                .iter()
                .map(|(x, y)| SolarMirror::new(FixedVec2::from_ints(*x, *y)))
                .collect();
            players.insert(
                participant.id.clone(),
                PlayerState {
                    faction: participant.faction,
                    solarium: STARTING_SOLARIUM,
                    forge: StellarForge {
                        position: FixedVec2::from_ints(forge_pos.0, forge_pos.1),
                        health: FORGE_HEALTH,
                        receiving_light: false,
                    },
                    mirrors,
                    units_produced: 0,
                },
            );
        }

        Self {
            state: SolState {
                tick: 0,
                seed: setup.seed,
                map: setup.map.clone(),
                players,
                units: BTreeMap::new(),
                next_unit_id: 1,
                rng: RngSlot::seeded(setup.seed),
            },
        }
    }

    /// Read-only view of the state.
    pub fn state(&self) -> &SolState {
        &self.state
    }

    fn apply(&mut self, command: &Command) {
        if !self.state.players.contains_key(&command.originator) {
            debug!(originator = %command.originator, "Command from unknown player ignored");
            return;
        }

        match &command.kind {
            CommandKind::UnitMove { unit_ids, target } => {
                let target = target.clamp_to_bounds(self.state.map.half_width, self.state.map.half_height);
                self.for_owned_units(&command.originator, unit_ids, |unit| unit.target = Some(target));
            }
            CommandKind::UnitStop { unit_ids } => {
                self.for_owned_units(&command.originator, unit_ids, |unit| unit.target = None);
            }
            CommandKind::ProduceUnit { unit_type } => match UnitType::parse(unit_type) {
                Some(unit_type) => self.produce_unit(&command.originator, unit_type),
                None => debug!(unit_type = %unit_type, "Unknown unit type ignored"),
            },
            CommandKind::PlaceMirror { position } => self.place_mirror(&command.originator, *position),
            CommandKind::Noop | CommandKind::StateFingerprint { .. } | CommandKind::Custom { .. } => {}
        }
    }

    fn for_owned_units(&mut self, owner: &PlayerId, unit_ids: &[UnitId], mut f: impl FnMut(&mut Unit)) {
        for id in unit_ids {
            if let Some(unit) = self.state.units.get_mut(id) {
                if &unit.owner == owner {
                    f(unit);
                }
            }
        }
    }

    fn produce_unit(&mut self, owner: &PlayerId, unit_type: UnitType) {
        let Some(player) = self.state.players.get_mut(owner) else {
            return;
        };
        if player.is_defeated() || !player.forge.receiving_light {
            return;
        }
        if !player.spend(unit_type.cost()) {
            return;
        }
        player.units_produced += 1;
        let forge = player.forge.position;

        let position = match self.state.rng.get_mut() {
            Ok(rng) => rng.next_offset(forge, SPAWN_RADIUS),
            Err(e) => {
                debug!("Spawning at forge: {}", e);
                forge
            }
        };

        let id = self.state.next_unit_id;
        self.state.next_unit_id += 1;
        self.state.units.insert(
            id,
            Unit { owner: owner.clone(), unit_type, position, target: None },
        );
    }

    fn place_mirror(&mut self, owner: &PlayerId, position: FixedVec2) {
        let bounds = (self.state.map.half_width, self.state.map.half_height);
        let Some(player) = self.state.players.get_mut(owner) else {
            return;
        };
        if player.is_defeated() || player.mirrors.len() >= MAX_MIRRORS {
            return;
        }
        if player.spend(MIRROR_COST) {
            player.mirrors.push(SolarMirror::new(position.clamp_to_bounds(bounds.0, bounds.1)));
        }
    }

    fn move_units(&mut self, dt: Fixed) {
        for unit in self.state.units.values_mut() {
            if let Some(target) = unit.target {
                let step = fixed_mul(unit.unit_type.speed(), dt);
                unit.position = unit.position.step_toward(target, step);
                if unit.position == target {
                    unit.target = None;
                }
            }
        }
    }

    fn generate_solarium(&mut self, dt: Fixed) {
        let intensity = self.state.map.suns.iter().map(|s| s.intensity).max().unwrap_or(0);
        for player in self.state.players.values_mut() {
            if player.is_defeated() {
                continue;
            }
            player.forge.receiving_light = intensity > 0 && !player.mirrors.is_empty();
            if intensity <= 0 {
                continue;
            }
            for mirror in &player.mirrors {
                let rate = fixed_mul(fixed_mul(SOL_PER_SECOND, mirror.efficiency), intensity);
                player.solarium = (player.solarium + fixed_mul(rate, dt)).min(SOLARIUM_CAP);
            }
        }
    }
}

impl Simulation for SolSimulation {
    fn advance(&mut self, dt: Fixed, commands: &[Command]) {
        for command in commands {
            self.apply(command);
        }
        self.move_units(dt);
        self.generate_solarium(dt);
        self.state.tick += 1;
    }

    fn fingerprint(&self) -> Fingerprint {
        self.state.fingerprint()
    }

    fn tick(&self) -> Tick {
        self.state.tick
    }
}

/// Builds [`SolSimulation`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolSimulationFactory;

impl SimulationFactory for SolSimulationFactory {
    type Sim = SolSimulation;

    fn create(&self, setup: &MatchSetup) -> SolSimulation {
        SolSimulation::new(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{from_int, tick_delta};
    use crate::lockstep::setup::{Faction, Participant};

    const DT: Fixed = 1092;

    fn setup() -> MatchSetup {
        MatchSetup::new(
            12345,
            vec![
                Participant::new("alice", Faction::Radiant, 0),
                Participant::new("bob", Faction::Aurum, 1),
            ],
        )
    }

    fn produce(tick: Tick, who: &str, seq: u32) -> Command {
        Command::new(tick, who, seq, CommandKind::ProduceUnit { unit_type: "scout".into() })
    }

    #[test]
    fn test_initial_layout() {
        let sim = SolSimulation::new(&setup());
        let alice = &sim.state().players[&PlayerId::from("alice")];
        assert_eq!(alice.forge.position, FixedVec2::from_ints(-500, 0));
        assert_eq!(alice.mirrors.len(), 2);
        assert_eq!(alice.solarium, STARTING_SOLARIUM);
        assert_eq!(sim.tick(), 0);
        assert_eq!(tick_delta(60), DT);
    }

    #[test]
    fn test_mirrors_generate_solarium() {
        let mut sim = SolSimulation::new(&setup());
        for _ in 0..60 {
            sim.advance(DT, &[]);
        }
        // Two mirrors at 10 Sol/s for (almost) one second.
        let alice = &sim.state().players[&PlayerId::from("alice")];
        let gained = alice.solarium - STARTING_SOLARIUM;
        assert!(gained > from_int(19) && gained <= from_int(20), "gained {}", gained);
        assert!(alice.forge.receiving_light);
    }

    #[test]
    fn test_production_needs_light() {
        let mut sim = SolSimulation::new(&setup());
        sim.advance(DT, &[produce(0, "alice", 0)]);
        assert!(sim.state().units.is_empty());

        sim.advance(DT, &[produce(1, "alice", 0)]);
        assert_eq!(sim.state().units.len(), 1);
        let unit = &sim.state().units[&1];
        assert_eq!(unit.owner, PlayerId::from("alice"));
        assert!((unit.position.x - from_int(-500)).abs() <= SPAWN_RADIUS);
    }

    #[test]
    fn test_move_only_own_units() {
        let mut sim = SolSimulation::new(&setup());
        sim.advance(DT, &[]);
        sim.advance(DT, &[produce(1, "alice", 0)]);
        let start = sim.state().units[&1].position;

        let target = FixedVec2::from_ints(0, 0);
        sim.advance(DT, &[Command::new(2, "bob", 0, CommandKind::UnitMove { unit_ids: vec![1], target })]);
        assert_eq!(sim.state().units[&1].position, start);

        sim.advance(DT, &[Command::new(3, "alice", 0, CommandKind::UnitMove { unit_ids: vec![1], target })]);
        assert_ne!(sim.state().units[&1].position, start);
        assert_eq!(sim.state().units[&1].target, Some(target));

        sim.advance(DT, &[Command::new(4, "alice", 0, CommandKind::UnitStop { unit_ids: vec![1] })]);
        assert_eq!(sim.state().units[&1].target, None);
    }

    #[test]
    fn test_same_inputs_same_fingerprint() {
        let script = |sim: &mut SolSimulation| {
            for t in 0..120u32 {
                let cmds = match t {
                    1 => vec![produce(t, "alice", 0), produce(t, "bob", 0)],
                    10 => vec![Command::new(t, "alice", 0, CommandKind::PlaceMirror { position: FixedVec2::from_ints(-300, 50) })],
                    _ => vec![],
                };
                sim.advance(DT, &cmds);
            }
            sim.fingerprint()
        };
        let mut a = SolSimulation::new(&setup());
        let mut b = SolSimulation::new(&setup());
        assert_eq!(script(&mut a), script(&mut b));

        let mut other_seed = setup();
        other_seed.seed = 1;
        let mut c = SolSimulation::new(&other_seed);
        let mut fresh = SolSimulation::new(&setup());
        assert_ne!(script(&mut fresh), script(&mut c));
    }

    #[test]
    fn test_order_changes_outcome() {
        let mut a = SolSimulation::new(&setup());
        let mut b = SolSimulation::new(&setup());
        a.advance(DT, &[]);
        b.advance(DT, &[]);
        a.advance(DT, &[produce(1, "alice", 0), produce(1, "bob", 0)]);
        b.advance(DT, &[produce(1, "bob", 0), produce(1, "alice", 0)]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
