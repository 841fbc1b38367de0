//! SoL Match State
//!
//! Players, their Stellar Forge and Solar Mirrors, and units. All quantities
//! are fixed-point and all collections are ordered, so iterating the state
//! visits everything in the same order on every peer.

use std::collections::BTreeMap;

use crate::core::fixed::{from_int, to_fixed, Fixed};
use crate::core::hash::{Fingerprint, StateHasher};
use crate::core::rng::RngSlot;
use crate::core::vec2::FixedVec2;
use crate::lockstep::command::{PlayerId, Tick, UnitId};
use crate::lockstep::setup::{Faction, MapConfig};

/// Solarium every player starts with.
pub const STARTING_SOLARIUM: Fixed = from_int(100);

/// Solarium can never exceed this.
pub const SOLARIUM_CAP: Fixed = from_int(30_000);

/// Stellar Forge starting health.
pub const FORGE_HEALTH: Fixed = from_int(1000);

/// Solar Mirror starting health.
pub const MIRROR_HEALTH: Fixed = from_int(100);

/// Solarium produced by one fully efficient mirror per second.
pub const SOL_PER_SECOND: Fixed = from_int(10);

/// Cost of a new Solar Mirror.
pub const MIRROR_COST: Fixed = from_int(75);

/// Mirrors a single player may own.
pub const MAX_MIRRORS: usize = 8;

/// Radius around the forge in which new units appear.
pub const SPAWN_RADIUS: Fixed = from_int(20);

/// Producible unit types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitType {
    /// Fast, cheap.
    Scout,
    /// Slow, expensive.
    Heavy,
}

impl UnitType {
    /// Parse the command payload name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "scout" => Some(Self::Scout),
            "heavy" | "heavy_unit" => Some(Self::Heavy),
            _ => None,
        }
    }

    /// Solarium cost.
    pub fn cost(self) -> Fixed {
        match self {
            Self::Scout => from_int(50),
            Self::Heavy => from_int(100),
        }
    }

    /// Movement speed (map units per second).
    pub fn speed(self) -> Fixed {
        match self {
            Self::Scout => from_int(60),
            Self::Heavy => to_fixed(30.0),
        }
    }

    /// Stable numeric code.
    pub fn code(self) -> u8 {
        match self {
            Self::Scout => 0,
            Self::Heavy => 1,
        }
    }
}

/// Main base. Produces units while it receives light.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StellarForge {
    /// Position.
    pub position: FixedVec2,
    /// Health.
    pub health: Fixed,
    /// Whether a mirror currently feeds it light.
    pub receiving_light: bool,
}

/// Reflects sunlight into Solarium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolarMirror {
    /// Position.
    pub position: FixedVec2,
    /// Health.
    pub health: Fixed,
    /// Efficiency in `[0, 1]`.
    pub efficiency: Fixed,
}

impl SolarMirror {
    /// A new mirror at full efficiency.
    pub fn new(position: FixedVec2) -> Self {
        Self { position, health: MIRROR_HEALTH, efficiency: crate::core::fixed::FIXED_ONE }
    }
}

/// Per-player state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerState {
    /// Faction.
    pub faction: Faction,
    /// Currency.
    pub solarium: Fixed,
    /// Main base.
    pub forge: StellarForge,
    /// Mirrors in placement order.
    pub mirrors: Vec<SolarMirror>,
    /// Units produced so far.
    pub units_produced: u32,
}

impl PlayerState {
    /// Spend Solarium if affordable.
    pub fn spend(&mut self, amount: Fixed) -> bool {
        if self.solarium >= amount {
            self.solarium -= amount;
            true
        } else {
            false
        }
    }

    /// Whether the forge is destroyed.
    pub fn is_defeated(&self) -> bool {
        self.forge.health <= 0
    }
}

/// A unit on the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Owning player.
    pub owner: PlayerId,
    /// Type.
    pub unit_type: UnitType,
    /// Position.
    pub position: FixedVec2,
    /// Movement target, if moving.
    pub target: Option<FixedVec2>,
}

/// Complete SoL simulation state.
#[derive(Debug, Clone)]
pub struct SolState {
    /// Ticks simulated.
    pub tick: Tick,
    /// Match seed.
    pub seed: u32,
    /// Map.
    pub map: MapConfig,
    /// Players by id.
    pub players: BTreeMap<PlayerId, PlayerState>,
    /// Units by id.
    pub units: BTreeMap<UnitId, Unit>,
    /// Next unit id to hand out.
    pub next_unit_id: UnitId,
    /// Match RNG.
    pub rng: RngSlot,
}

impl SolState {
    /// Fingerprint over a canonical encoding of the whole state.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut h = StateHasher::for_simulation();
        h.update_u32(self.tick);
        h.update_u32(self.seed);
        match self.rng.get() {
            Ok(rng) => {
                h.update_u32(rng.state());
                h.update_u64(rng.draws());
            }
            Err(_) => h.update_u8(0xFF),
        }

        h.update_u32(self.players.len() as u32);
        for (id, player) in &self.players {
            h.update_str(id.as_str());
            h.update_u8(player.faction.code());
            h.update_fixed(player.solarium);
            h.update_vec2(player.forge.position);
            h.update_fixed(player.forge.health);
            h.update_bool(player.forge.receiving_light);
            h.update_u32(player.units_produced);
            h.update_u32(player.mirrors.len() as u32);
            for mirror in &player.mirrors {
                h.update_vec2(mirror.position);
                h.update_fixed(mirror.health);
                h.update_fixed(mirror.efficiency);
            }
        }

        h.update_u32(self.next_unit_id);
        h.update_u32(self.units.len() as u32);
        for (id, unit) in &self.units {
            h.update_u32(*id);
            h.update_str(unit.owner.as_str());
            h.update_u8(unit.unit_type.code());
            h.update_vec2(unit.position);
            match unit.target {
                Some(target) => {
                    h.update_bool(true);
                    h.update_vec2(target);
                }
                None => h.update_bool(false),
            }
        }
        h.finalize()
    }

    /// Units owned by `player`.
    pub fn units_of<'a>(&'a self, player: &'a PlayerId) -> impl Iterator<Item = (&'a UnitId, &'a Unit)> + 'a {
        self.units.iter().filter(move |(_, u)| &u.owner == player)
    }
}
