//! Turning game events into delivery outcomes.
//!
//! | Event                                   | Outcome                     |
//! |-----------------------------------------|-----------------------------|
//! | pause / resume                          | Accept                      |
//! | own move                                | Discard                     |
//! | move landing on empty ground            | Accept                      |
//! | move landing on this player's army      | Accept, war published       |
//! | war started by someone else             | Retry                       |
//! | war with nothing left to fight          | Discard                     |
//! | war fought (won, lost or drawn)         | Accept, game log published  |
//!
//! A follow-up publish that fails turns the outcome into Retry.

use tracing::{error, info, warn};

use crate::game::messages::{ArmyMove, GameLog, PlayingState, RecognitionOfWar};
use crate::game::routing::{EXCHANGE_GAME_LOGS, EXCHANGE_PERIL_TOPIC, game_log_key, war_key};
use crate::game::state::{GameSession, MoveOutcome, WarOutcome};
use crate::pubsub::{AckOutcome, BincodeCodec, JsonCodec, Publisher};

pub async fn handle_pause(session: &GameSession, state: PlayingState) -> AckOutcome {
    match session.with(|gs| gs.handle_pause(state)) {
        Ok(()) => {
            if state.is_paused {
                info!("Game paused by the server");
            } else {
                info!("Game resumed by the server");
            }
            AckOutcome::Accept
        }
        Err(e) => {
            error!("Cannot apply pause state: {e}");
            AckOutcome::Retry
        }
    }
}

pub async fn handle_move(
    session: &GameSession,
    wars: &Publisher<JsonCodec>,
    army_move: ArmyMove,
) -> AckOutcome {
    let (outcome, defender) = match session.with(|gs| (gs.handle_move(&army_move), gs.snapshot())) {
        Ok(result) => result,
        Err(e) => {
            error!("Cannot apply move: {e}");
            return AckOutcome::Retry;
        }
    };

    match outcome {
        MoveOutcome::SamePlayer => AckOutcome::Discard,
        MoveOutcome::Safe => {
            info!(
                "{} moved {} unit groups to {}",
                army_move.player.username,
                army_move.units.len(),
                army_move.to
            );
            AckOutcome::Accept
        }
        MoveOutcome::MakeWar => {
            let attacker = army_move.player.username.clone();
            let war = RecognitionOfWar {
                attacker: army_move.player,
                defender,
            };
            match wars
                .publish(EXCHANGE_PERIL_TOPIC, &war_key(&attacker), &war)
                .await
            {
                Ok(()) => {
                    info!("{attacker} marched into {}: war declared", army_move.to);
                    AckOutcome::Accept
                }
                Err(e) => {
                    warn!("Failed to declare war on {attacker}: {e}");
                    AckOutcome::Retry
                }
            }
        }
    }
}

pub async fn handle_war(
    session: &GameSession,
    logs: &Publisher<BincodeCodec>,
    war: RecognitionOfWar,
) -> AckOutcome {
    let (outcome, username) =
        match session.with(|gs| (gs.handle_war(&war), gs.username().to_string())) {
            Ok(result) => result,
            Err(e) => {
                error!("Cannot fight war: {e}");
                return AckOutcome::Retry;
            }
        };

    let message = match (&outcome, outcome.log_message()) {
        (WarOutcome::NotInvolved, _) => return AckOutcome::Retry,
        (WarOutcome::NoUnits, _) | (_, None) => return AckOutcome::Discard,
        (_, Some(message)) => message,
    };
    info!("{message}");

    let log = GameLog::now(&username, message);
    match logs
        .publish(EXCHANGE_GAME_LOGS, &game_log_key(&username), &log)
        .await
    {
        Ok(()) => AckOutcome::Accept,
        Err(e) => {
            warn!("Failed to publish war log: {e}");
            AckOutcome::Retry
        }
    }
}
