//! Message kinds carried between game processes.
//!
//! Pause, move and war messages travel as JSON; game logs as bincode.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::game::error::GameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Antarctica,
    Australia,
}

impl Location {
    pub const ALL: [Location; 6] = [
        Location::Americas,
        Location::Europe,
        Location::Africa,
        Location::Asia,
        Location::Antarctica,
        Location::Australia,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Location::Americas => "americas",
            Location::Europe => "europe",
            Location::Africa => "africa",
            Location::Asia => "asia",
            Location::Antarctica => "antarctica",
            Location::Australia => "australia",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        Location::ALL
            .into_iter()
            .find(|location| location.as_str() == lowered)
            .ok_or_else(|| GameError::UnknownLocation(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

impl UnitRank {
    pub const ALL: [UnitRank; 3] = [UnitRank::Infantry, UnitRank::Cavalry, UnitRank::Artillery];

    /// Fighting strength of a single unit.
    pub fn power(self) -> u32 {
        match self {
            UnitRank::Infantry => 1,
            UnitRank::Cavalry => 5,
            UnitRank::Artillery => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnitRank::Infantry => "infantry",
            UnitRank::Cavalry => "cavalry",
            UnitRank::Artillery => "artillery",
        }
    }
}

impl fmt::Display for UnitRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitRank {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        UnitRank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == lowered)
            .ok_or_else(|| GameError::UnknownRank(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCount {
    pub rank: UnitRank,
    pub quantity: u32,
}

impl UnitCount {
    pub fn new(rank: UnitRank, quantity: u32) -> Self {
        Self { rank, quantity }
    }

    /// Combat power of the stack, widened so no quantity can overflow it.
    pub fn power(&self) -> u64 {
        u64::from(self.rank.power()) * u64::from(self.quantity)
    }
}

/// A player's name and armies at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub username: String,
    pub armies: BTreeMap<Location, Vec<UnitCount>>,
}

impl PlayerSnapshot {
    pub fn power_at(&self, location: Location) -> u64 {
        self.armies
            .get(&location)
            .map(|units| {
                units
                    .iter()
                    .map(UnitCount::power)
                    .fold(0, u64::saturating_add)
            })
            .unwrap_or(0)
    }

    pub fn has_units_at(&self, location: Location) -> bool {
        self.armies
            .get(&location)
            .is_some_and(|units| units.iter().any(|u| u.quantity > 0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Units a player moved, with the player's armies after the move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    pub player: PlayerSnapshot,
    pub from: Location,
    pub to: Location,
    pub units: Vec<UnitCount>,
}

/// Raised by the player a move landed on, addressed to the mover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    pub attacker: PlayerSnapshot,
    pub defender: PlayerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub username: String,
    pub message: String,
}

impl GameLog {
    pub fn now(username: &str, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            username: username.to_string(),
            message: message.into(),
        }
    }
}
