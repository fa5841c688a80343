use crate::game::messages::{Location, UnitRank};
use crate::pubsub::PubSubError;
use crate::utils::error::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("unknown command '{0}', type help for the list")]
    UnknownCommand(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown location '{0}'")]
    UnknownLocation(String),

    #[error("unknown unit rank '{0}'")]
    UnknownRank(String),

    #[error("invalid quantity '{0}'")]
    InvalidQuantity(String),

    #[error("the game is paused, units cannot move")]
    Paused,

    #[error("units are already in {0}")]
    SameLocation(Location),

    #[error("not enough {rank} in {location}: have {available}, need {requested}")]
    NotEnoughUnits {
        location: Location,
        rank: UnitRank,
        available: u32,
        requested: u32,
    },

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("game log file: {0}")]
    Io(#[from] std::io::Error),
}
