//! Exchange names, routing keys and queue names of the game.

use tracing::info;

use crate::broker::{ExchangeKind, QueueOptions};
use crate::client::Channel;
use crate::utils::error::BrokerError;

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
pub const EXCHANGE_GAME_LOGS: &str = "game_logs";

pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

pub const ARMY_MOVES_PATTERN: &str = "army_moves.*";
pub const WAR_PATTERN: &str = "war.*";
pub const GAME_LOG_PATTERN: &str = "game_logs.*";

/// Shared by every player; each war message waits there for its attacker.
/// A player who is not the attacker answers `Retry`, which only reaches the
/// right player if the queue is shared and durable rather than per player.
pub const WAR_QUEUE: &str = "war";
pub const GAME_LOG_QUEUE: &str = "game_logs";

pub fn pause_queue(player: &str) -> String {
    format!("{PAUSE_KEY}.{player}")
}

pub fn army_moves_key(player: &str) -> String {
    format!("{ARMY_MOVES_PREFIX}.{player}")
}

pub fn army_moves_queue(player: &str) -> String {
    army_moves_key(player)
}

pub fn war_key(attacker: &str) -> String {
    format!("{WAR_RECOGNITIONS_PREFIX}.{attacker}")
}

pub fn game_log_key(player: &str) -> String {
    format!("{GAME_LOG_SLUG}.{player}")
}

/// Declare the game's exchanges and the dead-letter queue behind
/// `dead_letter_exchange`. Safe to run from every process.
pub async fn declare_game_topology(
    channel: &dyn Channel,
    dead_letter_exchange: &str,
) -> Result<(), BrokerError> {
    channel
        .exchange_declare(EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct, true)
        .await?;
    channel
        .exchange_declare(EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic, true)
        .await?;
    channel
        .exchange_declare(EXCHANGE_GAME_LOGS, ExchangeKind::Topic, true)
        .await?;
    channel
        .exchange_declare(dead_letter_exchange, ExchangeKind::Fanout, true)
        .await?;

    let dead_letters = QueueOptions {
        durable: true,
        ..QueueOptions::default()
    };
    channel.queue_declare(DEAD_LETTER_QUEUE, dead_letters).await?;
    channel
        .queue_bind(DEAD_LETTER_QUEUE, dead_letter_exchange, "")
        .await?;

    info!("Game topology ready (dead letters via {dead_letter_exchange})");
    Ok(())
}
