use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::{Channel, Connection};
use crate::config::PubSubSettings;
use crate::game::commands::{CLIENT_HELP, Command};
use crate::game::error::GameError;
use crate::game::handlers::{handle_move, handle_pause, handle_war};
use crate::game::messages::{ArmyMove, GameLog, Location, PlayingState, RecognitionOfWar, UnitCount, UnitRank};
use crate::game::routing::{
    ARMY_MOVES_PATTERN, EXCHANGE_GAME_LOGS, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC,
    PAUSE_KEY, WAR_PATTERN, WAR_QUEUE, army_moves_key, army_moves_queue,
    declare_game_topology, game_log_key, pause_queue,
};
use crate::game::state::GameSession;
use crate::game::subscribe_options;
use crate::pubsub::{
    BincodeCodec, JsonCodec, Publisher, SimpleQueueType, Subscription, subscribe_json,
};

const SPAM_LINES: [&str; 4] = [
    "Never interrupt your enemy when he is making a mistake.",
    "The hardest thing of all for a soldier is to retreat.",
    "A soldier will fight long and hard for a bit of colored ribbon.",
    "It is well that war is so terrible, or we should grow too fond of it.",
];

/// A player taking part in the game.
#[derive(Debug)]
pub struct Player {
    session: GameSession,
    moves: Publisher<JsonCodec>,
    logs: Publisher<BincodeCodec>,
    subscriptions: Vec<Subscription>,
}

impl Player {
    /// Declare the topology and start the pause, move and war subscriptions.
    /// If one of them cannot start, the ones already running are closed.
    pub async fn join(
        conn: &dyn Connection,
        username: &str,
        settings: &PubSubSettings,
    ) -> Result<Self, GameError> {
        let channel = conn.create_channel().await?;
        declare_game_topology(channel.as_ref(), &settings.dead_letter_exchange).await?;

        let session = GameSession::new(username);
        // Handlers publish follow-up events on a channel of their own.
        let events = conn.create_channel().await?;
        let mut subscriptions = Vec::with_capacity(3);
        if let Err(e) =
            start_handlers(conn, &session, events.clone(), settings, &mut subscriptions).await
        {
            warn!("{username} could not join: {e}");
            for subscription in subscriptions {
                if let Err(close_err) = subscription.close().await {
                    debug!("Closing a partial subscription failed: {close_err}");
                }
            }
            for ch in [&events, &channel] {
                if let Err(close_err) = ch.close().await {
                    debug!("Closing channel {} failed: {close_err}", ch.id());
                }
            }
            return Err(e);
        }

        info!("{username} joined the game");
        Ok(Self {
            session,
            moves: Publisher::new(channel.clone(), JsonCodec),
            logs: Publisher::new(channel, BincodeCodec),
            subscriptions,
        })
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn username(&self) -> Result<String, GameError> {
        self.session.with(|gs| gs.username().to_string())
    }

    pub fn spawn(&self, location: Location, rank: UnitRank, quantity: u32) -> Result<(), GameError> {
        self.session.with(|gs| gs.spawn(location, rank, quantity))?
    }

    /// Move units locally, then tell the other players.
    pub async fn move_units(
        &self,
        from: Location,
        to: Location,
        units: &[UnitCount],
    ) -> Result<ArmyMove, GameError> {
        let army_move = self.session.with(|gs| gs.move_units(from, to, units))??;
        let key = army_moves_key(&army_move.player.username);
        self.moves
            .publish(EXCHANGE_PERIL_TOPIC, &key, &army_move)
            .await?;
        Ok(army_move)
    }

    /// Flood the game log with `count` records.
    pub async fn spam(&self, count: u32) -> Result<(), GameError> {
        let username = self.username()?;
        let key = game_log_key(&username);
        for i in 0..count {
            let line = SPAM_LINES[i as usize % SPAM_LINES.len()];
            self.logs
                .publish(EXCHANGE_GAME_LOGS, &key, &GameLog::now(&username, line))
                .await?;
        }
        Ok(())
    }

    /// Run a console command and return the text to show.
    pub async fn execute(&self, command: Command) -> Result<String, GameError> {
        match command {
            Command::Spawn {
                location,
                rank,
                quantity,
            } => {
                self.spawn(location, rank, quantity)?;
                Ok(format!("Spawned {quantity} {rank} in {location}"))
            }
            Command::Move { from, to, units } => {
                let army_move = self.move_units(from, to, &units).await?;
                let moved: u32 = army_move.units.iter().map(|u| u.quantity).sum();
                Ok(format!("Moved {moved} units from {from} to {to}"))
            }
            Command::Status => self.session.with(|gs| gs.status()),
            Command::Spam(count) => {
                self.spam(count).await?;
                Ok(format!("Published {count} log records"))
            }
            Command::Help => Ok(CLIENT_HELP.to_string()),
            Command::Quit => Ok("Goodbye".to_string()),
        }
    }
}

async fn start_handlers(
    conn: &dyn Connection,
    session: &GameSession,
    events: Arc<dyn Channel>,
    settings: &PubSubSettings,
    started: &mut Vec<Subscription>,
) -> Result<(), GameError> {
    let username = session.with(|gs| gs.username().to_string())?;
    let wars = Publisher::new(events.clone(), JsonCodec);
    let war_logs = Publisher::new(events, BincodeCodec);
    let options = subscribe_options(settings);

    let pause_session = session.clone();
    started.push(
        subscribe_json(
            conn,
            EXCHANGE_PERIL_DIRECT,
            &pause_queue(&username),
            PAUSE_KEY,
            SimpleQueueType::Transient,
            options.clone(),
            move |state: PlayingState| {
                let session = pause_session.clone();
                async move { handle_pause(&session, state).await }
            },
        )
        .await?,
    );

    let move_session = session.clone();
    started.push(
        subscribe_json(
            conn,
            EXCHANGE_PERIL_TOPIC,
            &army_moves_queue(&username),
            ARMY_MOVES_PATTERN,
            SimpleQueueType::Transient,
            options.clone(),
            move |army_move: ArmyMove| {
                let session = move_session.clone();
                let wars = wars.clone();
                async move { handle_move(&session, &wars, army_move).await }
            },
        )
        .await?,
    );

    let war_session = session.clone();
    started.push(
        subscribe_json(
            conn,
            EXCHANGE_PERIL_TOPIC,
            WAR_QUEUE,
            WAR_PATTERN,
            SimpleQueueType::Durable,
            options,
            move |war: RecognitionOfWar| {
                let session = war_session.clone();
                let logs = war_logs.clone();
                async move { handle_war(&session, &logs, war).await }
            },
        )
        .await?,
    );
    Ok(())
}
