use std::path::PathBuf;

use tracing::info;

use crate::client::Connection;
use crate::config::Settings;
use crate::game::commands::{SERVER_HELP, ServerCommand};
use crate::game::error::GameError;
use crate::game::logs::handle_log;
use crate::game::messages::{GameLog, PlayingState};
use crate::game::routing::{
    EXCHANGE_GAME_LOGS, EXCHANGE_PERIL_DIRECT, GAME_LOG_PATTERN, GAME_LOG_QUEUE, PAUSE_KEY,
    declare_game_topology,
};
use crate::game::subscribe_options;
use crate::pubsub::{JsonCodec, Publisher, SimpleQueueType, Subscription, subscribe_bincode};

/// The game server: aggregates logs and pauses or resumes every player.
#[derive(Debug)]
pub struct GameServer {
    signals: Publisher<JsonCodec>,
    logs: Subscription,
}

impl GameServer {
    pub async fn start(conn: &dyn Connection, settings: &Settings) -> Result<Self, GameError> {
        let channel = conn.create_channel().await?;
        declare_game_topology(channel.as_ref(), &settings.pubsub.dead_letter_exchange).await?;

        let log_file = PathBuf::from(&settings.game.log_file);
        let options = subscribe_options(&settings.pubsub).with_prefetch(settings.pubsub.log_prefetch);
        let logs = subscribe_bincode(
            conn,
            EXCHANGE_GAME_LOGS,
            GAME_LOG_QUEUE,
            GAME_LOG_PATTERN,
            SimpleQueueType::Durable,
            options,
            move |log: GameLog| {
                let path = log_file.clone();
                async move { handle_log(&path, log).await }
            },
        )
        .await?;

        info!("Peril server started, logging to {}", settings.game.log_file);
        Ok(Self {
            signals: Publisher::new(channel, JsonCodec),
            logs,
        })
    }

    pub async fn set_paused(&self, is_paused: bool) -> Result<(), GameError> {
        self.signals
            .publish(EXCHANGE_PERIL_DIRECT, PAUSE_KEY, &PlayingState { is_paused })
            .await?;
        info!("Sent {} to all players", if is_paused { "pause" } else { "resume" });
        Ok(())
    }

    /// Run a console command and return the text to show.
    pub async fn execute(&self, command: ServerCommand) -> Result<String, GameError> {
        match command {
            ServerCommand::Pause => {
                self.set_paused(true).await?;
                Ok("Game paused".to_string())
            }
            ServerCommand::Resume => {
                self.set_paused(false).await?;
                Ok("Game resumed".to_string())
            }
            ServerCommand::Help => Ok(SERVER_HELP.to_string()),
            ServerCommand::Quit => Ok("Shutting down the server".to_string()),
        }
    }

    pub fn log_subscription(&self) -> &Subscription {
        &self.logs
    }
}
