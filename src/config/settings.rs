use serde::Deserialize;

/// Top-level configuration for every `peril` process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub pubsub: PubSubSettings,
    pub game: GameSettings,
    pub logging: LoggingSettings,
}

/// Where the network broker listens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Operational limits of the broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub max_connections: usize,
    /// Stored messages older than this are dropped when the broker recovers.
    pub message_ttl_secs: u64,
    /// Directory of the `sled` store. Without one, durable state lives in memory.
    pub data_dir: Option<String>,
}

/// How game processes reach the broker and consume from it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PubSubSettings {
    pub url: String,
    pub dead_letter_exchange: String,
    pub log_prefetch: u16,
    pub max_redeliveries: Option<u32>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GameSettings {
    /// File the server appends aggregated game logs to.
    pub log_file: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Settings as found in files or the environment, every value optional.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub pubsub: Option<PartialPubSubSettings>,
    pub game: Option<PartialGameSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub message_ttl_secs: Option<u64>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPubSubSettings {
    pub url: Option<String>,
    pub dead_letter_exchange: Option<String>,
    pub log_prefetch: Option<u16>,
    pub max_redeliveries: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialGameSettings {
    pub log_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let pubsub = self.pubsub.unwrap_or_default();
        let game = self.game.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .max_connections
                    .unwrap_or(defaults.broker.max_connections),
                message_ttl_secs: broker
                    .message_ttl_secs
                    .unwrap_or(defaults.broker.message_ttl_secs),
                data_dir: broker.data_dir.or(defaults.broker.data_dir),
            },
            pubsub: PubSubSettings {
                url: pubsub.url.unwrap_or(defaults.pubsub.url),
                dead_letter_exchange: pubsub
                    .dead_letter_exchange
                    .unwrap_or(defaults.pubsub.dead_letter_exchange),
                log_prefetch: pubsub.log_prefetch.unwrap_or(defaults.pubsub.log_prefetch),
                max_redeliveries: pubsub.max_redeliveries.or(defaults.pubsub.max_redeliveries),
            },
            game: GameSettings {
                log_file: game.log_file.unwrap_or(defaults.game.log_file),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                max_connections: 1000,
                message_ttl_secs: 3600,
                data_dir: None,
            },
            pubsub: PubSubSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                dead_letter_exchange: "peril_dlx".to_string(),
                log_prefetch: 10,
                max_redeliveries: None,
            },
            game: GameSettings {
                log_file: "game.log".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Address the network broker binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
