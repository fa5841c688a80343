use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::{
    Broker, ChannelId, ConnectionId, DeliveryTag, ExchangeKind, Publishing, QueueInfo,
    QueueOptions,
};
use crate::client::{Channel, Connection, Consumer};
use crate::utils::error::BrokerError;

fn lock(broker: &Mutex<Broker>) -> Result<MutexGuard<'_, Broker>, BrokerError> {
    broker
        .lock()
        .map_err(|_| BrokerError::ConnectionClosed("broker lock poisoned".to_string()))
}

/// A connection to a broker living in this process.
///
/// Dropping the connection closes it on the broker.
#[derive(Debug)]
pub struct LocalConnection {
    id: ConnectionId,
    broker: Arc<Mutex<Broker>>,
}

impl LocalConnection {
    pub fn open(broker: Arc<Mutex<Broker>>) -> Result<Self, BrokerError> {
        let id = lock(&broker)?.open_connection();
        Ok(Self { id, broker })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        let id = lock(&self.broker)?.open_channel(self.id)?;
        Ok(Arc::new(LocalChannel {
            id,
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        lock(&self.broker)?.close_connection(self.id);
        Ok(())
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        if let Ok(mut broker) = self.broker.lock() {
            broker.close_connection(self.id);
        }
    }
}

#[derive(Debug)]
pub struct LocalChannel {
    id: ChannelId,
    broker: Arc<Mutex<Broker>>,
}

#[async_trait]
impl Channel for LocalChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let mut broker = lock(&self.broker)?;
        broker.channel_connection(self.id)?;
        broker.declare_exchange(exchange, kind, durable)
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        lock(&self.broker)?.declare_queue(self.id, queue, options)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        lock(&self.broker)?.bind_queue(self.id, queue, exchange, routing_key)
    }

    async fn queue_delete(&self, queue: &str) -> Result<(), BrokerError> {
        let mut broker = lock(&self.broker)?;
        broker.channel_connection(self.id)?;
        broker.delete_queue(queue);
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        lock(&self.broker)?.set_prefetch(self.id, prefetch_count)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<(), BrokerError> {
        let mut broker = lock(&self.broker)?;
        broker.channel_connection(self.id)?;
        let routed = broker.publish(exchange, routing_key, publishing)?;
        debug!("Published to {exchange}/{routing_key}, routed to {routed} queues");
        Ok(())
    }

    async fn basic_consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let tag = lock(&self.broker)?.consume(self.id, queue, "", tx)?;
        Ok(Consumer {
            tag,
            deliveries: rx,
        })
    }

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError> {
        lock(&self.broker)?.ack(self.id, delivery_tag)
    }

    async fn basic_nack(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        lock(&self.broker)?.nack(self.id, delivery_tag, requeue)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        lock(&self.broker)?.close_channel(self.id);
        Ok(())
    }
}
