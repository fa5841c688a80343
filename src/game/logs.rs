use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::game::messages::GameLog;
use crate::pubsub::AckOutcome;

pub fn format_log_line(log: &GameLog) -> String {
    format!(
        "{} {}: {}\n",
        log.current_time.to_rfc3339(),
        log.username,
        log.message
    )
}

/// Append one record to the log file, creating it if needed.
pub async fn write_log(path: &Path, log: &GameLog) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format_log_line(log).as_bytes()).await?;
    file.flush().await
}

pub async fn handle_log(path: &Path, log: GameLog) -> AckOutcome {
    match write_log(path, &log).await {
        Ok(()) => {
            debug!("Logged record from {}", log.username);
            AckOutcome::Accept
        }
        Err(e) => {
            warn!("Failed to write game log to {}: {e}", path.display());
            AckOutcome::Retry
        }
    }
}
