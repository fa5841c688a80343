//! Broker engine
//!
//! This module contains the AMQP-like broker implementation responsible for:
//! - managing exchanges, queues and the bindings between them
//! - routing published messages to every matching queue
//! - pushing ready messages to consumers, honouring each consumer's prefetch
//! - tracking unsettled deliveries until they are acked or nacked
//! - dead-lettering messages nacked without requeue
//! - cleaning up channels, connections and their transient queues
//! - writing durable state through to `Persistence`
//!
//! Concurrency and usage notes:
//! - The public API here is synchronous and designed to be held behind a
//!   lock (for example `Arc<Mutex<Broker>>`) by the connection layer. Callers
//!   should avoid holding the broker lock across network I/O to prevent
//!   blocking other operations.
//! - Deliveries are pushed into each consumer's unbounded sender while the
//!   lock is held; the prefetch limit is what bounds how many are in flight.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::exchange::{Exchange, ExchangeKind};
use crate::broker::message::{
    ChannelId, ConnectionId, ConsumerTag, Delivery, DeliveryTag, Message, Publishing,
};
use crate::broker::queue::{Queue, QueueInfo, QueueOptions, QueueStats, QueuedMessage};
use crate::persistence::{BindingDef, ExchangeDef, Persistence, QueueDef};
use crate::utils::error::BrokerError;

/// Name of the nameless exchange that routes straight to the queue named by the key.
pub const DEFAULT_EXCHANGE: &str = "";

#[derive(Debug)]
struct ChannelState {
    connection: ConnectionId,
    prefetch: u16,
}

#[derive(Debug)]
struct ConsumerState {
    queue: String,
    channel: ChannelId,
    prefetch: u16,
    unacked: usize,
    sink: UnboundedSender<Delivery>,
}

impl ConsumerState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked < usize::from(self.prefetch)
    }
}

#[derive(Debug)]
struct Unsettled {
    queue: String,
    channel: ChannelId,
    consumer_tag: ConsumerTag,
    entry: QueuedMessage,
}

#[derive(Debug, Default)]
pub struct Broker {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    connections: HashMap<ConnectionId, HashSet<ChannelId>>,
    channels: HashMap<ChannelId, ChannelState>,
    consumers: HashMap<ConsumerTag, ConsumerState>,
    unsettled: HashMap<DeliveryTag, Unsettled>,
    next_id: u64,
    next_seq: u64,
    next_tag: DeliveryTag,
    persistence: Option<Persistence>,
}

impl Broker {
    /// An in-memory broker. Durable entities last as long as the process.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker that writes durable state through to `persistence` and
    /// recovers whatever a previous run left there.
    pub fn with_persistence(persistence: Persistence) -> Result<Self, BrokerError> {
        let mut broker = Self {
            persistence: Some(persistence.clone()),
            ..Self::default()
        };

        for def in persistence.load_exchanges()? {
            broker
                .exchanges
                .insert(def.name.clone(), Exchange::new(&def.name, def.kind, true));
        }

        let mut max_seq = 0;
        for def in persistence.load_queues()? {
            let mut queue = Queue::new(&def.name, def.options.clone(), None);
            for stored in persistence.load_messages(&def.name)? {
                max_seq = max_seq.max(stored.seq);
                queue.ready.push_back(QueuedMessage {
                    seq: stored.seq,
                    message: stored.message,
                    delivery_count: 0,
                });
            }
            for binding in &def.bindings {
                match broker.exchanges.get_mut(&binding.exchange) {
                    Some(exchange) => {
                        exchange.bind(&def.name, &binding.routing_key);
                    }
                    None => warn!(
                        "Dropping recovered binding of {} to missing exchange {}",
                        def.name, binding.exchange
                    ),
                }
            }
            info!(
                "Recovered durable queue {} with {} messages",
                def.name,
                queue.ready.len()
            );
            broker.queues.insert(def.name.clone(), queue);
        }
        broker.next_seq = max_seq + 1;

        Ok(broker)
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn open_connection(&mut self) -> ConnectionId {
        let id = self.next_id();
        self.connections.insert(id, HashSet::new());
        debug!("Opened connection {id}");
        id
    }

    pub fn open_channel(&mut self, connection: ConnectionId) -> Result<ChannelId, BrokerError> {
        if !self.connections.contains_key(&connection) {
            return Err(BrokerError::ConnectionClosed(format!(
                "connection {connection} is not open"
            )));
        }
        let id = self.next_id();
        self.channels.insert(
            id,
            ChannelState {
                connection,
                prefetch: 0,
            },
        );
        if let Some(channels) = self.connections.get_mut(&connection) {
            channels.insert(id);
        }
        debug!("Opened channel {id} on connection {connection}");
        Ok(id)
    }

    /// The connection a channel belongs to.
    pub fn channel_connection(&self, channel: ChannelId) -> Result<ConnectionId, BrokerError> {
        self.channels
            .get(&channel)
            .map(|c| c.connection)
            .ok_or(BrokerError::ChannelClosed(channel))
    }

    /// Cancel the channel's consumers and return their unsettled deliveries to
    /// their queues. Closing an unknown channel is a no-op.
    pub fn close_channel(&mut self, channel: ChannelId) {
        let Some(state) = self.channels.remove(&channel) else {
            return;
        };
        if let Some(channels) = self.connections.get_mut(&state.connection) {
            channels.remove(&channel);
        }

        let tags: Vec<ConsumerTag> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.channel == channel)
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in tags {
            self.cancel_consumer(&tag);
        }
        debug!("Closed channel {channel}");
    }

    /// Close every channel of the connection and delete its exclusive queues.
    pub fn close_connection(&mut self, connection: ConnectionId) {
        let Some(channels) = self.connections.remove(&connection) else {
            return;
        };
        for channel in channels {
            self.close_channel(channel);
        }

        let owned: Vec<String> = self
            .queues
            .values()
            .filter(|q| q.owner == Some(connection))
            .map(|q| q.name.clone())
            .collect();
        for name in owned {
            self.delete_queue(&name);
        }
        info!("Closed connection {connection}");
    }

    pub fn declare_exchange(
        &mut self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::PreconditionFailed(
                "the default exchange cannot be redeclared".to_string(),
            ));
        }
        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind || existing.durable != durable {
                return Err(BrokerError::PreconditionFailed(format!(
                    "exchange '{name}' redeclared with different attributes"
                )));
            }
            return Ok(());
        }

        if durable {
            if let Some(persistence) = &self.persistence {
                persistence.store_exchange(&ExchangeDef {
                    name: name.to_string(),
                    kind,
                })?;
            }
        }
        self.exchanges
            .insert(name.to_string(), Exchange::new(name, kind, durable));
        debug!("Declared {kind:?} exchange {name}");
        Ok(())
    }

    /// Declare a queue on behalf of `channel`'s connection.
    ///
    /// An empty name asks the broker to generate one. Redeclaring with the
    /// same options is a no-op; different options fail with
    /// `PreconditionFailed`.
    pub fn declare_queue(
        &mut self,
        channel: ChannelId,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        let connection = self.channel_connection(channel)?;
        let name = if name.is_empty() {
            format!("amq.gen-{}", Uuid::new_v4())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if existing.owner.is_some_and(|owner| owner != connection) {
                return Err(BrokerError::ResourceLocked(format!(
                    "queue '{name}' is exclusive to another connection"
                )));
            }
            if existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "queue '{name}' redeclared with different attributes"
                )));
            }
            return Ok(existing.info(false));
        }

        let owner = options.exclusive.then_some(connection);
        let queue = Queue::new(&name, options, owner);
        let info = queue.info(true);
        self.queues.insert(name.clone(), queue);
        self.persist_queue(&name)?;
        debug!("Declared queue {name}");
        Ok(info)
    }

    /// Delete a queue, its bindings, its consumers and its messages.
    /// Returns the number of messages that were dropped with it.
    pub fn delete_queue(&mut self, name: &str) -> usize {
        let Some(queue) = self.queues.remove(name) else {
            return 0;
        };
        for exchange in self.exchanges.values_mut() {
            exchange.unbind_queue(name);
        }
        for tag in &queue.consumers {
            self.consumers.remove(tag);
        }
        let before = self.unsettled.len();
        self.unsettled.retain(|_, u| u.queue != name);
        let dropped = queue.ready.len() + (before - self.unsettled.len());

        if queue.options.durable {
            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.remove_queue(name) {
                    warn!("Failed to remove stored queue {name}: {e}");
                }
            }
        }
        debug!("Deleted queue {name} ({dropped} messages dropped)");
        dropped
    }

    pub fn bind_queue(
        &mut self,
        channel: ChannelId,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let connection = self.channel_connection(channel)?;
        let Some(q) = self.queues.get(queue) else {
            return Err(BrokerError::NotFound(format!("queue '{queue}'")));
        };
        if q.owner.is_some_and(|owner| owner != connection) {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }
        let Some(ex) = self.exchanges.get_mut(exchange) else {
            return Err(BrokerError::NotFound(format!("exchange '{exchange}'")));
        };
        if ex.bind(queue, routing_key) {
            debug!("Bound queue {queue} to {exchange} with key {routing_key}");
            self.persist_queue(queue)?;
        }
        Ok(())
    }

    /// Prefetch applied to consumers created on this channel afterwards. 0 = unlimited.
    pub fn set_prefetch(&mut self, channel: ChannelId, prefetch: u16) -> Result<(), BrokerError> {
        let state = self
            .channels
            .get_mut(&channel)
            .ok_or(BrokerError::ChannelClosed(channel))?;
        state.prefetch = prefetch;
        Ok(())
    }

    /// Route a message through `exchange`. Returns how many queues received it;
    /// a message no queue matches is dropped.
    pub fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<usize, BrokerError> {
        let targets = self.route(exchange, routing_key)?;
        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            content_type: publishing.content_type,
            payload: publishing.payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message_id: Uuid::new_v4().to_string(),
        };

        if targets.is_empty() {
            debug!("Unroutable message on {exchange} with key {routing_key} dropped");
        }
        for queue in &targets {
            self.enqueue(queue, message.clone());
            self.dispatch(queue);
        }
        Ok(targets.len())
    }

    /// Attach a consumer to `queue`; deliveries are pushed into `sink`.
    /// An empty tag asks the broker to generate one.
    pub fn consume(
        &mut self,
        channel: ChannelId,
        queue: &str,
        consumer_tag: &str,
        sink: UnboundedSender<Delivery>,
    ) -> Result<ConsumerTag, BrokerError> {
        let state = self
            .channels
            .get(&channel)
            .ok_or(BrokerError::ChannelClosed(channel))?;
        let (connection, prefetch) = (state.connection, state.prefetch);

        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::NotFound(format!("queue '{queue}'")))?;
        if q.owner.is_some_and(|owner| owner != connection) {
            return Err(BrokerError::ResourceLocked(format!(
                "queue '{queue}' is exclusive to another connection"
            )));
        }

        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}", Uuid::new_v4())
        } else {
            consumer_tag.to_string()
        };
        if self.consumers.contains_key(&tag) {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{tag}' is already in use"
            )));
        }

        q.add_consumer(tag.clone());
        self.consumers.insert(
            tag.clone(),
            ConsumerState {
                queue: queue.to_string(),
                channel,
                prefetch,
                unacked: 0,
                sink,
            },
        );
        debug!("Consumer {tag} attached to {queue} (prefetch {prefetch})");
        self.dispatch(queue);
        Ok(tag)
    }

    /// Settle a delivery as processed: the message is gone for good.
    pub fn ack(&mut self, channel: ChannelId, delivery_tag: DeliveryTag) -> Result<(), BrokerError> {
        let unsettled = self.take_unsettled(channel, delivery_tag)?;
        self.forget_stored(&unsettled.queue, unsettled.entry.seq);
        self.dispatch(&unsettled.queue);
        Ok(())
    }

    /// Settle a delivery as failed. With `requeue` the message goes back to the
    /// head of its queue; without it the message is dead-lettered or dropped.
    pub fn nack(
        &mut self,
        channel: ChannelId,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let unsettled = self.take_unsettled(channel, delivery_tag)?;
        if requeue {
            match self.queues.get_mut(&unsettled.queue) {
                Some(queue) => queue.ready.push_front(unsettled.entry),
                None => self.forget_stored(&unsettled.queue, unsettled.entry.seq),
            }
        } else {
            self.forget_stored(&unsettled.queue, unsettled.entry.seq);
            self.dead_letter(&unsettled.queue, unsettled.entry.message);
        }
        self.dispatch(&unsettled.queue);
        Ok(())
    }

    pub fn queue_stats(&self, name: &str) -> Option<QueueStats> {
        let queue = self.queues.get(name)?;
        Some(QueueStats {
            ready: queue.ready.len(),
            unacked: self.unsettled.values().filter(|u| u.queue == name).count(),
            consumers: queue.consumers.len(),
        })
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }
        self.exchanges
            .get(exchange)
            .map(|ex| ex.route(routing_key))
            .ok_or_else(|| BrokerError::NotFound(format!("exchange '{exchange}'")))
    }

    fn enqueue(&mut self, queue_name: &str, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return;
        };
        if queue.options.durable {
            if let Some(persistence) = &self.persistence {
                if let Err(e) = persistence.store_message(queue_name, seq, &message) {
                    warn!("Failed to store message for {queue_name}: {e}");
                }
            }
        }
        queue.ready.push_back(QueuedMessage {
            seq,
            message,
            delivery_count: 0,
        });
    }

    fn dead_letter(&mut self, queue_name: &str, message: Message) {
        let dlx = self
            .queues
            .get(queue_name)
            .and_then(|q| q.options.dead_letter_exchange.clone());
        let Some(dlx) = dlx else {
            debug!("Discarded message {} from {queue_name}", message.message_id);
            return;
        };
        match self.route(&dlx, &message.routing_key) {
            Ok(targets) => {
                for target in &targets {
                    self.enqueue(target, message.clone());
                    self.dispatch(target);
                }
                debug!(
                    "Dead-lettered message {} from {queue_name} to {dlx} ({} queues)",
                    message.message_id,
                    targets.len()
                );
            }
            Err(e) => warn!("Dead-letter exchange of {queue_name} unusable, message dropped: {e}"),
        }
    }

    /// Push ready messages to consumers with spare prefetch capacity, round-robin.
    fn dispatch(&mut self, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.ready.is_empty() {
                return;
            }
            let chosen = queue
                .consumers_in_turn()
                .into_iter()
                .find(|tag| self.consumers.get(tag).is_some_and(|c| c.has_capacity()));
            let Some(tag) = chosen else {
                return;
            };
            let Some(mut entry) = queue.ready.pop_front() else {
                return;
            };
            queue.advance_past(&tag);

            let Some(consumer) = self.consumers.get_mut(&tag) else {
                queue.ready.push_front(entry);
                return;
            };
            entry.delivery_count += 1;
            let delivery_tag = self.next_tag + 1;
            let delivery = Delivery {
                delivery_tag,
                consumer_tag: tag.clone(),
                redelivered: entry.delivery_count > 1,
                delivery_count: entry.delivery_count,
                message: entry.message.clone(),
            };

            if consumer.sink.send(delivery).is_err() {
                entry.delivery_count -= 1;
                queue.ready.push_front(entry);
                debug!("Consumer {tag} went away; cancelling it");
                self.cancel_consumer(&tag);
                continue;
            }

            self.next_tag = delivery_tag;
            consumer.unacked += 1;
            self.unsettled.insert(
                delivery_tag,
                Unsettled {
                    queue: queue_name.to_string(),
                    channel: consumer.channel,
                    consumer_tag: tag,
                    entry,
                },
            );
        }
    }

    /// Remove a consumer and put its unsettled deliveries back at the head of
    /// the queue in their original order.
    fn cancel_consumer(&mut self, tag: &str) {
        let Some(consumer) = self.consumers.remove(tag) else {
            return;
        };
        let mut returned: Vec<(DeliveryTag, QueuedMessage)> = Vec::new();
        self.unsettled.retain(|delivery_tag, u| {
            if u.consumer_tag == tag {
                returned.push((*delivery_tag, u.entry.clone()));
                false
            } else {
                true
            }
        });
        returned.sort_by_key(|(delivery_tag, _)| std::cmp::Reverse(*delivery_tag));

        let Some(queue) = self.queues.get_mut(&consumer.queue) else {
            return;
        };
        queue.remove_consumer(tag);
        for (_, entry) in returned {
            queue.ready.push_front(entry);
        }

        if queue.options.auto_delete && queue.consumers.is_empty() {
            let name = queue.name.clone();
            self.delete_queue(&name);
        } else {
            self.dispatch(&consumer.queue);
        }
    }

    fn take_unsettled(
        &mut self,
        channel: ChannelId,
        delivery_tag: DeliveryTag,
    ) -> Result<Unsettled, BrokerError> {
        match self.unsettled.get(&delivery_tag) {
            Some(u) if u.channel == channel => {}
            _ => return Err(BrokerError::UnknownDeliveryTag(delivery_tag)),
        }
        let unsettled = self
            .unsettled
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag(delivery_tag))?;
        if let Some(consumer) = self.consumers.get_mut(&unsettled.consumer_tag) {
            consumer.unacked = consumer.unacked.saturating_sub(1);
        }
        Ok(unsettled)
    }

    fn forget_stored(&self, queue_name: &str, seq: u64) {
        let durable = self
            .queues
            .get(queue_name)
            .is_some_and(|q| q.options.durable);
        if let (true, Some(persistence)) = (durable, &self.persistence) {
            if let Err(e) = persistence.remove_message(queue_name, seq) {
                warn!("Failed to remove stored message {seq} of {queue_name}: {e}");
            }
        }
    }

    fn persist_queue(&self, name: &str) -> Result<(), BrokerError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let Some(queue) = self.queues.get(name) else {
            return Ok(());
        };
        if !queue.options.durable {
            return Ok(());
        }
        let bindings = self
            .exchanges
            .values()
            .filter(|ex| ex.durable)
            .flat_map(|ex| {
                ex.bindings
                    .iter()
                    .filter(|b| b.queue == name)
                    .map(|b| BindingDef {
                        exchange: ex.name.clone(),
                        routing_key: b.routing_key.clone(),
                    })
            })
            .collect();
        persistence.store_queue(&QueueDef {
            name: name.to_string(),
            options: queue.options.clone(),
            bindings,
        })?;
        Ok(())
    }
}
