//! CLI for Peril
//!
//! Subcommands:
//! - `broker`: run the WebSocket broker every game process connects to
//! - `server`: run the game server console (pause, resume, log aggregation)
//! - `client --name <player>`: join the game as a player

use std::error::Error;
use std::future::Future;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use peril::broker::Broker;
use peril::client::{Connection, RemoteConnection};
use peril::config::{Settings, load_config_from};
use peril::game::commands::{CLIENT_HELP, SERVER_HELP};
use peril::game::{
    Command as PlayerCommand, GameError, GameServer, Player, ServerCommand, parse_command,
    parse_server_command,
};
use peril::persistence::Persistence;
use peril::transport::start_websocket_server;
use peril::utils::logging;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "peril", about = "A turn-based strategy game played over pub/sub")]
struct Cli {
    /// Configuration file to read instead of config/default
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the WebSocket broker
    Broker,
    /// Start the game server console
    Server,
    /// Join the game as a player
    Client {
        /// Player name, unique per game
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config_from(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cli.command {
        Command::Broker => run_broker(settings).await,
        Command::Server => run_server(settings).await,
        Command::Client { name } => run_client(settings, &name).await,
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_broker(settings: Settings) -> Result<(), Box<dyn Error>> {
    let broker = match &settings.broker.data_dir {
        Some(dir) => {
            let ttl = i64::try_from(settings.broker.message_ttl_secs).unwrap_or(i64::MAX);
            Broker::with_persistence(Persistence::new(dir, Some(ttl))?)?
        }
        None => Broker::new(),
    };
    let broker = Arc::new(Mutex::new(broker));

    tokio::select! {
        result = start_websocket_server(settings.listen_addr(), broker, settings.clone()) => {
            result?;
            error!("Broker stopped accepting connections.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }
    Ok(())
}

async fn run_server(settings: Settings) -> Result<(), Box<dyn Error>> {
    let conn = RemoteConnection::connect(&settings.pubsub.url).await?;
    let server = GameServer::start(&conn, &settings).await?;
    println!("{SERVER_HELP}");

    console(
        &conn,
        parse_server_command,
        |command: &ServerCommand| *command == ServerCommand::Quit,
        |command: ServerCommand| server.execute(command),
    )
    .await?;

    conn.close().await?;
    Ok(())
}

async fn run_client(settings: Settings, name: &str) -> Result<(), Box<dyn Error>> {
    let conn = RemoteConnection::connect(&settings.pubsub.url).await?;
    let player = Player::join(&conn, name, &settings.pubsub).await?;
    println!("Welcome to Peril, {name}!\n{CLIENT_HELP}");

    console(
        &conn,
        parse_command,
        |command: &PlayerCommand| *command == PlayerCommand::Quit,
        |command: PlayerCommand| player.execute(command),
    )
    .await?;

    conn.close().await?;
    Ok(())
}

/// Read commands from stdin until quit, end of input, or Ctrl-C.
async fn console<C, P, Q, R, Fut>(
    conn: &RemoteConnection,
    parse: P,
    is_quit: Q,
    run: R,
) -> Result<(), Box<dyn Error>>
where
    P: Fn(&str) -> Result<Option<C>, GameError>,
    Q: Fn(&C) -> bool,
    R: Fn(C) -> Fut,
    Fut: Future<Output = Result<String, GameError>>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(());
                };
                let command = match parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                let quit = is_quit(&command);
                match run(command).await {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("{e}"),
                }
                if quit {
                    return Ok(());
                }
                if conn.is_closed() {
                    return Err("connection to the broker was lost".into());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                return Ok(());
            }
        }
    }
}
