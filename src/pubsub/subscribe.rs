//! Typed subscriptions and the consumer loop behind them.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt, stream};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{ConsumerTag, Delivery};
use crate::client::{Channel, Connection, Consumer};
use crate::pubsub::ack::{AckOutcome, settle};
use crate::pubsub::codec::{BincodeCodec, Codec, CodecError, JsonCodec};
use crate::pubsub::error::PubSubError;
use crate::pubsub::topology::{SimpleQueueType, declare_and_bind};

#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Unacknowledged deliveries the broker may push ahead. `None` keeps the
    /// broker default, which is unlimited.
    pub prefetch: Option<u16>,
    /// Where discarded deliveries are republished.
    pub dead_letter_exchange: Option<String>,
    /// Once a delivery has been redelivered this many times, a `Retry`
    /// becomes a `Discard`. `None` retries without limit.
    pub max_redeliveries: Option<u32>,
    /// Deliveries handled at the same time. `1` keeps strict queue order.
    pub concurrency: usize,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            prefetch: None,
            dead_letter_exchange: None,
            max_redeliveries: None,
            concurrency: 1,
        }
    }
}

impl SubscribeOptions {
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = Some(exchange.into());
        self
    }

    pub fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = Some(max_redeliveries);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Handle to a running consumer loop.
///
/// The loop ends when the broker stops delivering: the channel or connection
/// closed, or the consumer was cancelled. Dropping the handle leaves it
/// running.
pub struct Subscription {
    queue: String,
    consumer_tag: ConsumerTag,
    channel: Arc<dyn Channel>,
    task: JoinHandle<()>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("consumer_tag", &self.consumer_tag)
            .field("channel", &self.channel.id())
            .finish()
    }
}

impl Subscription {
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop handling deliveries. Unsettled ones return to the queue when the
    /// channel closes.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Stop the loop and close its channel, which cancels the consumer. A
    /// transient queue goes away with it.
    pub async fn close(self) -> Result<(), PubSubError> {
        self.task.abort();
        self.channel.close().await.map_err(PubSubError::transport)
    }

    /// Wait for the loop to end on its own.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("Consumer loop for {} failed: {e}", self.queue);
            }
        }
    }
}

/// Declare and bind a queue, then run `handler` on every decoded delivery.
///
/// Returns once the consumer is registered; the loop runs in its own task.
/// Every delivery is settled exactly once with the handler's outcome. A
/// payload `decode` rejects, or a handler that panics, settles as
/// `AckOutcome::default()` and the loop keeps going.
#[allow(clippy::too_many_arguments)]
pub async fn subscribe<T, D, H, Fut>(
    conn: &dyn Connection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    options: SubscribeOptions,
    decode: D,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    T: Send + 'static,
    D: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync + 'static,
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckOutcome> + Send + 'static,
{
    let (channel, queue) = declare_and_bind(
        conn,
        exchange,
        queue_name,
        key,
        queue_type,
        options.dead_letter_exchange.as_deref(),
    )
    .await?;

    let consumer = match start_consuming(channel.as_ref(), &queue.name, options.prefetch).await {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!("Failed to consume from {}: {e}", queue.name);
            if queue.created {
                if let Err(delete_err) = channel.queue_delete(&queue.name).await {
                    debug!("Cleanup of queue {} failed: {delete_err}", queue.name);
                }
            }
            if let Err(close_err) = channel.close().await {
                debug!("Closing channel {} failed: {close_err}", channel.id());
            }
            return Err(e);
        }
    };

    info!(
        "Consumer {} subscribed to {} (exchange {exchange}, key {key})",
        consumer.tag, queue.name
    );
    let policy = LoopPolicy {
        max_redeliveries: options.max_redeliveries,
        concurrency: options.concurrency.max(1),
    };
    let task = tokio::spawn(consume_loop(
        channel.clone(),
        consumer.deliveries,
        queue.name.clone(),
        policy,
        decode,
        handler,
    ));

    Ok(Subscription {
        queue: queue.name,
        consumer_tag: consumer.tag,
        channel,
        task,
    })
}

/// [`subscribe`] for JSON payloads.
pub async fn subscribe_json<T, H, Fut>(
    conn: &dyn Connection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    T: DeserializeOwned + Send + 'static,
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckOutcome> + Send + 'static,
{
    let decode = |data: &[u8]| JsonCodec.decode::<T>(data);
    subscribe(conn, exchange, queue_name, key, queue_type, options, decode, handler).await
}

/// [`subscribe`] for bincode payloads.
pub async fn subscribe_bincode<T, H, Fut>(
    conn: &dyn Connection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription, PubSubError>
where
    T: DeserializeOwned + Send + 'static,
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckOutcome> + Send + 'static,
{
    let decode = |data: &[u8]| BincodeCodec.decode::<T>(data);
    subscribe(conn, exchange, queue_name, key, queue_type, options, decode, handler).await
}

async fn start_consuming(
    channel: &dyn Channel,
    queue: &str,
    prefetch: Option<u16>,
) -> Result<Consumer, PubSubError> {
    if let Some(prefetch) = prefetch {
        channel
            .basic_qos(prefetch)
            .await
            .map_err(PubSubError::setup)?;
    }
    channel
        .basic_consume(queue)
        .await
        .map_err(PubSubError::setup)
}

#[derive(Debug, Clone, Copy)]
struct LoopPolicy {
    max_redeliveries: Option<u32>,
    concurrency: usize,
}

async fn consume_loop<T, D, H, Fut>(
    channel: Arc<dyn Channel>,
    deliveries: UnboundedReceiver<Delivery>,
    queue: String,
    policy: LoopPolicy,
    decode: D,
    handler: H,
) where
    T: Send + 'static,
    D: Fn(&[u8]) -> Result<T, CodecError> + Send + Sync + 'static,
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AckOutcome> + Send + 'static,
{
    let channel = channel.as_ref();
    let queue = queue.as_str();
    let decode = &decode;
    let handler = &handler;

    let incoming = stream::unfold(deliveries, |mut rx| async move {
        rx.recv().await.map(|delivery| (delivery, rx))
    });

    incoming
        .for_each_concurrent(policy.concurrency, move |delivery| async move {
            let outcome = handle_delivery(&delivery, decode, handler).await;
            let outcome = limit_redeliveries(outcome, &delivery, policy.max_redeliveries);
            if let Err(e) = settle(channel, delivery.delivery_tag, outcome).await {
                error!(
                    "Failed to settle delivery {} on {queue} as {outcome}: {e}",
                    delivery.delivery_tag
                );
            }
        })
        .await;

    info!("Consumer loop for {queue} stopped");
}

async fn handle_delivery<T, D, H, Fut>(delivery: &Delivery, decode: &D, handler: &H) -> AckOutcome
where
    D: Fn(&[u8]) -> Result<T, CodecError>,
    H: Fn(T) -> Fut,
    Fut: Future<Output = AckOutcome>,
{
    let attempt = AssertUnwindSafe(async {
        match decode(delivery.payload()) {
            Ok(value) => Ok(handler(value).await),
            Err(e) => Err(e),
        }
    })
    .catch_unwind()
    .await;

    match attempt {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(
                "Cannot decode delivery {} ({}): {e}",
                delivery.delivery_tag, delivery.message.content_type
            );
            AckOutcome::default()
        }
        Err(panic) => {
            error!(
                "Handler panicked on delivery {}: {}",
                delivery.delivery_tag,
                panic_message(panic.as_ref())
            );
            AckOutcome::default()
        }
    }
}

fn limit_redeliveries(
    outcome: AckOutcome,
    delivery: &Delivery,
    max_redeliveries: Option<u32>,
) -> AckOutcome {
    match max_redeliveries {
        Some(max) if outcome == AckOutcome::Retry && delivery.delivery_count > max => {
            warn!(
                "Delivery {} was redelivered {} times, discarding",
                delivery.delivery_tag,
                delivery.delivery_count.saturating_sub(1)
            );
            AckOutcome::Discard
        }
        _ => outcome,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
