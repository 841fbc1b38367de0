//! Match Setup
//!
//! Everything needed to build a fresh simulation: seed, participants and the
//! map snapshot. Live play and replay both start from a `MatchSetup` and
//! nothing else.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::command::PlayerId;
use crate::core::fixed::{from_int, Fixed, FIXED_ONE};
use crate::core::vec2::FixedVec2;

/// Playable factions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Faction {
    /// Radiant
    Radiant,
    /// Aurum
    Aurum,
    /// Solari
    Solari,
}

impl Faction {
    /// Stable numeric code (used in fingerprints).
    pub fn code(self) -> u8 {
        match self {
            Self::Radiant => 0,
            Self::Aurum => 1,
            Self::Solari => 2,
        }
    }
}

/// A player taking part in the match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Player id (also the command originator).
    pub id: PlayerId,
    /// Display name.
    pub display_name: String,
    /// Chosen faction.
    pub faction: Faction,
    /// Starting slot on the map.
    pub slot: u8,
}

impl Participant {
    /// Create a participant whose display name is its id.
    pub fn new(id: impl Into<PlayerId>, faction: Faction, slot: u8) -> Self {
        let id = id.into();
        Self { display_name: id.to_string(), id, faction, slot }
    }
}

/// A light source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunConfig {
    /// Position.
    pub position: FixedVec2,
    /// Light intensity (1.0 = standard).
    pub intensity: Fixed,
    /// Body radius.
    pub radius: Fixed,
}

/// Map snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Map name.
    pub name: String,
    /// Half width of the playable area.
    pub half_width: Fixed,
    /// Half height of the playable area.
    pub half_height: Fixed,
    /// Light sources.
    pub suns: Vec<SunConfig>,
}

impl MapConfig {
    /// Standard map: one sun at the centre.
    pub fn standard() -> Self {
        Self {
            name: "standard".to_string(),
            half_width: from_int(800),
            half_height: from_int(600),
            suns: vec![SunConfig {
                position: FixedVec2::ZERO,
                intensity: FIXED_ONE,
                radius: from_int(100),
            }],
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Everything required to construct a fresh simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSetup {
    /// RNG seed agreed at match start.
    pub seed: u32,
    /// Participants.
    pub participants: Vec<Participant>,
    /// Map snapshot.
    pub map: MapConfig,
}

impl MatchSetup {
    /// Setup on the standard map.
    pub fn new(seed: u32, participants: Vec<Participant>) -> Self {
        Self { seed, participants, map: MapConfig::standard() }
    }

    /// Ids of every participant.
    pub fn participant_ids(&self) -> BTreeSet<PlayerId> {
        self.participants.iter().map(|p| p.id.clone()).collect()
    }

    /// Look up a participant.
    pub fn participant(&self, id: &PlayerId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_ids_sorted() {
        let setup = MatchSetup::new(
            1,
            vec![
                Participant::new("zed", Faction::Solari, 0),
                Participant::new("amy", Faction::Aurum, 1),
            ],
        );
        let ids: Vec<String> = setup.participant_ids().iter().map(|p| p.to_string()).collect();
        assert_eq!(ids, vec!["amy", "zed"]);
        assert_eq!(setup.participant(&"amy".into()).map(|p| p.slot), Some(1));
    }

    #[test]
    fn test_faction_serde() {
        assert_eq!(serde_json::to_string(&Faction::Radiant).unwrap(), "\"radiant\"");
    }
}
