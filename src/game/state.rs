//! One player's view of the game and the rules applied to it.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};

use crate::game::error::GameError;
use crate::game::messages::{
    ArmyMove, Location, PlayerSnapshot, PlayingState, RecognitionOfWar, UnitCount, UnitRank,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move is this player's own.
    SamePlayer,
    /// Nothing of this player's stands where the units landed.
    Safe,
    /// The units landed on this player's army.
    MakeWar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarOutcome {
    /// The war is someone else's to fight.
    NotInvolved,
    /// Nothing left to fight with where the armies meet.
    NoUnits,
    YouWon {
        winner: String,
        loser: String,
        location: Location,
    },
    OpponentWon {
        winner: String,
        loser: String,
        location: Location,
    },
    Draw {
        attacker: String,
        defender: String,
        location: Location,
    },
}

impl WarOutcome {
    /// Line for the game log, once a war has been fought.
    pub fn log_message(&self) -> Option<String> {
        match self {
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
            WarOutcome::YouWon { winner, loser, .. }
            | WarOutcome::OpponentWon { winner, loser, .. } => {
                Some(format!("{winner} won a war against {loser}"))
            }
            WarOutcome::Draw {
                attacker, defender, ..
            } => Some(format!(
                "A war between {attacker} and {defender} resulted in a draw"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    username: String,
    paused: bool,
    armies: BTreeMap<Location, BTreeMap<UnitRank, u32>>,
}

impl GameState {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            paused: false,
            armies: BTreeMap::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn units_at(&self, location: Location, rank: UnitRank) -> u32 {
        self.armies
            .get(&location)
            .and_then(|ranks| ranks.get(&rank))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let armies = self
            .armies
            .iter()
            .map(|(location, ranks)| {
                let units = ranks
                    .iter()
                    .map(|(rank, quantity)| UnitCount::new(*rank, *quantity))
                    .collect();
                (*location, units)
            })
            .collect();
        PlayerSnapshot {
            username: self.username.clone(),
            armies,
        }
    }

    pub fn spawn(
        &mut self,
        location: Location,
        rank: UnitRank,
        quantity: u32,
    ) -> Result<(), GameError> {
        let total = self
            .units_at(location, rank)
            .checked_add(quantity)
            .filter(|_| quantity > 0)
            .ok_or_else(|| GameError::InvalidQuantity(quantity.to_string()))?;
        self.armies.entry(location).or_default().insert(rank, total);
        Ok(())
    }

    /// Move units between locations and describe the move for the others.
    /// Nothing changes unless every requested unit is available.
    pub fn move_units(
        &mut self,
        from: Location,
        to: Location,
        units: &[UnitCount],
    ) -> Result<ArmyMove, GameError> {
        if self.paused {
            return Err(GameError::Paused);
        }
        if from == to {
            return Err(GameError::SameLocation(to));
        }

        let mut requested: BTreeMap<UnitRank, u32> = BTreeMap::new();
        for unit in units {
            if unit.quantity == 0 {
                return Err(GameError::InvalidQuantity(unit.quantity.to_string()));
            }
            let entry = requested.entry(unit.rank).or_default();
            *entry = entry
                .checked_add(unit.quantity)
                .ok_or_else(|| GameError::InvalidQuantity(unit.quantity.to_string()))?;
        }
        let mut landed = Vec::with_capacity(requested.len());
        for (rank, quantity) in &requested {
            let available = self.units_at(from, *rank);
            if available < *quantity {
                return Err(GameError::NotEnoughUnits {
                    location: from,
                    rank: *rank,
                    available,
                    requested: *quantity,
                });
            }
            let total = self
                .units_at(to, *rank)
                .checked_add(*quantity)
                .ok_or_else(|| GameError::InvalidQuantity(quantity.to_string()))?;
            landed.push((*rank, *quantity, total));
        }

        for (rank, quantity, total) in landed {
            self.take(from, rank, quantity);
            self.armies.entry(to).or_default().insert(rank, total);
        }

        Ok(ArmyMove {
            player: self.snapshot(),
            from,
            to,
            units: requested
                .into_iter()
                .map(|(rank, quantity)| UnitCount::new(rank, quantity))
                .collect(),
        })
    }

    pub fn handle_pause(&mut self, state: PlayingState) {
        self.paused = state.is_paused;
    }

    pub fn handle_move(&self, army_move: &ArmyMove) -> MoveOutcome {
        if army_move.player.username == self.username {
            MoveOutcome::SamePlayer
        } else if self.has_units_at(army_move.to) {
            MoveOutcome::MakeWar
        } else {
            MoveOutcome::Safe
        }
    }

    /// Fight a war this player started. The loser, or both sides on a draw,
    /// lose their units at the contested location; only this player's own
    /// armies are changed here.
    pub fn handle_war(&mut self, war: &RecognitionOfWar) -> WarOutcome {
        if war.attacker.username != self.username {
            return WarOutcome::NotInvolved;
        }
        let contested = Location::ALL
            .into_iter()
            .find(|location| war.defender.has_units_at(*location) && self.has_units_at(*location));
        let Some(location) = contested else {
            return WarOutcome::NoUnits;
        };

        let attacker_power = self.power_at(location);
        let defender_power = war.defender.power_at(location);
        let attacker = self.username.clone();
        let defender = war.defender.username.clone();

        if attacker_power > defender_power {
            WarOutcome::YouWon {
                winner: attacker,
                loser: defender,
                location,
            }
        } else if attacker_power < defender_power {
            self.armies.remove(&location);
            WarOutcome::OpponentWon {
                winner: defender,
                loser: attacker,
                location,
            }
        } else {
            self.armies.remove(&location);
            WarOutcome::Draw {
                attacker,
                defender,
                location,
            }
        }
    }

    pub fn status(&self) -> String {
        let mut out = format!("Player: {}", self.username);
        if self.paused {
            out.push_str(" (paused)");
        }
        if self.armies.is_empty() {
            out.push_str("\n  no units");
        }
        for (location, ranks) in &self.armies {
            let _ = write!(out, "\n  {location}:");
            for (rank, quantity) in ranks {
                let _ = write!(out, " {quantity} {rank}");
            }
        }
        out
    }

    fn has_units_at(&self, location: Location) -> bool {
        self.armies
            .get(&location)
            .is_some_and(|ranks| ranks.values().any(|q| *q > 0))
    }

    fn power_at(&self, location: Location) -> u64 {
        self.armies
            .get(&location)
            .map(|ranks| {
                ranks
                    .iter()
                    .map(|(rank, q)| UnitCount::new(*rank, *q).power())
                    .fold(0, u64::saturating_add)
            })
            .unwrap_or(0)
    }

    fn take(&mut self, location: Location, rank: UnitRank, quantity: u32) {
        let Some(ranks) = self.armies.get_mut(&location) else {
            return;
        };
        if let Some(held) = ranks.get_mut(&rank) {
            *held = held.saturating_sub(quantity);
            if *held == 0 {
                ranks.remove(&rank);
            }
        }
        if ranks.is_empty() {
            self.armies.remove(&location);
        }
    }
}

/// The game state shared by a player's handlers and command loop.
#[derive(Debug, Clone)]
pub struct GameSession {
    state: Arc<Mutex<GameState>>,
}

impl GameSession {
    pub fn new(username: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(GameState::new(username))),
        }
    }

    /// Run `f` with the state locked.
    ///
    /// A poisoned lock is recovered: the state stays as the panicking caller
    /// left it.
    pub fn with<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> Result<R, GameError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut state))
    }
}
