mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, GameSettings, LoggingSettings, PubSubSettings, ServerSettings, Settings,
};

/// Load `config/default.*` (if present) and `PERIL_*` environment variables,
/// merged over `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(None)
}

/// Like [`load_config`], but reads `path` instead of `config/default`. An
/// explicit path must exist.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name("config/default").required(false),
    };

    // PERIL_BROKER__MAX_CONNECTIONS=10 sets broker.max_connections
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix("PERIL")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
