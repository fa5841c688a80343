//! Parsing of the lines typed into the player and server consoles.

use crate::game::error::GameError;
use crate::game::messages::{Location, UnitCount, UnitRank};

pub const CLIENT_HELP: &str = "\
Possible commands:
* spawn <location> <rank> [quantity]
    example: spawn europe infantry 3
* move <from> <to> <rank>[:quantity]...
    example: move europe asia infantry:2 cavalry
* status
* spam <n>
* help
* quit
Locations: americas, europe, africa, asia, antarctica, australia
Ranks: infantry (1), cavalry (5), artillery (10)";

pub const SERVER_HELP: &str = "\
Possible commands:
* pause
* resume
* help
* quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Spawn {
        location: Location,
        rank: UnitRank,
        quantity: u32,
    },
    Move {
        from: Location,
        to: Location,
        units: Vec<UnitCount>,
    },
    Status,
    Spam(u32),
    Help,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerCommand {
    Pause,
    Resume,
    Help,
    Quit,
}

/// Parse one player console line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, GameError> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match verb.to_lowercase().as_str() {
        "spawn" => match args {
            [location, rank] => Command::Spawn {
                location: location.parse()?,
                rank: rank.parse()?,
                quantity: 1,
            },
            [location, rank, quantity] => Command::Spawn {
                location: location.parse()?,
                rank: rank.parse()?,
                quantity: parse_quantity(quantity)?,
            },
            _ => return Err(GameError::Usage("spawn <location> <rank> [quantity]")),
        },
        "move" => match args {
            [from, to, units @ ..] if !units.is_empty() => Command::Move {
                from: from.parse()?,
                to: to.parse()?,
                units: units
                    .iter()
                    .map(|unit| parse_unit(unit))
                    .collect::<Result<_, _>>()?,
            },
            _ => return Err(GameError::Usage("move <from> <to> <rank>[:quantity]...")),
        },
        "status" => Command::Status,
        "spam" => match args {
            [n] => Command::Spam(parse_quantity(n)?),
            _ => return Err(GameError::Usage("spam <n>")),
        },
        "help" => Command::Help,
        "quit" => Command::Quit,
        _ => return Err(GameError::UnknownCommand(verb.to_string())),
    };
    Ok(Some(command))
}

/// Parse one server console line. Blank lines yield `None`.
pub fn parse_server_command(line: &str) -> Result<Option<ServerCommand>, GameError> {
    let Some(verb) = line.split_whitespace().next() else {
        return Ok(None);
    };
    let command = match verb.to_lowercase().as_str() {
        "pause" => ServerCommand::Pause,
        "resume" => ServerCommand::Resume,
        "help" => ServerCommand::Help,
        "quit" => ServerCommand::Quit,
        _ => return Err(GameError::UnknownCommand(verb.to_string())),
    };
    Ok(Some(command))
}

fn parse_quantity(raw: &str) -> Result<u32, GameError> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(GameError::InvalidQuantity(raw.to_string())),
    }
}

// "cavalry" or "cavalry:3"
fn parse_unit(raw: &str) -> Result<UnitCount, GameError> {
    let (rank, quantity) = match raw.split_once(':') {
        Some((rank, quantity)) => (rank, parse_quantity(quantity)?),
        None => (raw, 1),
    };
    Ok(UnitCount::new(rank.parse()?, quantity))
}
