//! Peril, the game played over the pub/sub layer.
//!
//! Players move armies between six locations. A move that lands on another
//! player's army starts a war; the mover fights it and the result goes to
//! the server's game log. The server can pause and resume everyone.

pub mod client;
pub mod commands;
pub mod error;
pub mod handlers;
pub mod logs;
pub mod messages;
pub mod routing;
pub mod server;
pub mod state;

pub use client::Player;
pub use commands::{Command, ServerCommand, parse_command, parse_server_command};
pub use error::GameError;
pub use server::GameServer;
pub use state::{GameSession, GameState, MoveOutcome, WarOutcome};

use crate::config::PubSubSettings;
use crate::pubsub::SubscribeOptions;

/// Subscription options every game queue shares.
pub(crate) fn subscribe_options(settings: &PubSubSettings) -> SubscribeOptions {
    let options =
        SubscribeOptions::default().with_dead_letter_exchange(&settings.dead_letter_exchange);
    match settings.max_redeliveries {
        Some(max) => options.with_max_redeliveries(max),
        None => options,
    }
}
