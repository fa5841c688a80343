//! Queue declaration and binding.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::broker::{QueueInfo, QueueOptions};
use crate::client::{Channel, Connection};
use crate::pubsub::error::PubSubError;

/// Lifetime class of a declared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimpleQueueType {
    /// Survives broker restarts and outlives its consumers.
    Durable,
    /// Owned by the declaring connection and removed with its last consumer.
    Transient,
}

impl SimpleQueueType {
    pub fn queue_options(self, dead_letter_exchange: Option<&str>) -> QueueOptions {
        let transient = self == SimpleQueueType::Transient;
        QueueOptions {
            durable: !transient,
            exclusive: transient,
            auto_delete: transient,
            dead_letter_exchange: dead_letter_exchange.map(str::to_string),
        }
    }
}

/// Open a channel, declare `queue_name` and bind it to `exchange` with `key`.
///
/// An empty `queue_name` asks the broker to generate one; the returned
/// `QueueInfo` carries the actual name. On failure nothing this call created
/// is left behind: a freshly declared queue is deleted and the channel closed.
pub async fn declare_and_bind(
    conn: &dyn Connection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    dead_letter_exchange: Option<&str>,
) -> Result<(Arc<dyn Channel>, QueueInfo), PubSubError> {
    let channel = conn.create_channel().await.map_err(PubSubError::setup)?;
    let options = queue_type.queue_options(dead_letter_exchange);

    match declare_on(channel.as_ref(), exchange, queue_name, key, options).await {
        Ok(queue) => {
            info!(
                "Declared queue {} ({:?}) bound to {exchange} with key {key}",
                queue.name, queue_type
            );
            Ok((channel, queue))
        }
        Err(e) => {
            if let Err(close_err) = channel.close().await {
                debug!("Closing channel {} after failed setup: {close_err}", channel.id());
            }
            Err(e)
        }
    }
}

async fn declare_on(
    channel: &dyn Channel,
    exchange: &str,
    queue_name: &str,
    key: &str,
    options: QueueOptions,
) -> Result<QueueInfo, PubSubError> {
    let queue = channel
        .queue_declare(queue_name, options)
        .await
        .map_err(|e| {
            warn!("Failed to declare queue {queue_name}: {e}");
            PubSubError::setup(e)
        })?;

    if let Err(e) = channel.queue_bind(&queue.name, exchange, key).await {
        warn!(
            "Failed to bind queue {} to {exchange} with key {key}: {e}",
            queue.name
        );
        if queue.created {
            if let Err(delete_err) = channel.queue_delete(&queue.name).await {
                debug!("Cleanup of queue {} failed: {delete_err}", queue.name);
            }
        }
        return Err(PubSubError::setup(e));
    }

    Ok(queue)
}
