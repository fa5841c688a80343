use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `peril` logs at `level` and every
/// other crate at `warn`, which keeps sled and tungstenite quiet. An
/// unparsable level falls back to `info`.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    // try_init: tests and the game console may call this more than once
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn default_filter(level: &str) -> EnvFilter {
    let level = level
        .trim()
        .to_lowercase()
        .replace("warning", "warn")
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    EnvFilter::new(format!("warn,peril={level}"))
}
