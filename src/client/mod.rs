//! The `client` module defines how the pub/sub layer talks to a broker.
//!
//! [`Connection`] and [`Channel`] are the only broker surface the core
//! consumes. Two implementations are provided:
//!
//! - [`LocalConnection`]: an in-process broker behind `Arc<Mutex<Broker>>`,
//!   used by tests and single-process setups.
//! - [`RemoteConnection`]: a WebSocket client for the network broker served by
//!   `transport::websocket`.
//!
//! A channel is meant to be owned by one task at a time; the connection can be
//! shared to open more channels.

pub mod local;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::broker::{
    ChannelId, ConsumerTag, Delivery, DeliveryTag, ExchangeKind, Publishing, QueueInfo,
    QueueOptions,
};
use crate::utils::error::BrokerError;

pub use local::LocalConnection;
pub use remote::RemoteConnection;

/// A registered consumer: its tag and the stream of deliveries pushed to it.
///
/// The stream ends when the consumer is cancelled, its channel or connection
/// closes, or its queue is deleted.
#[derive(Debug)]
pub struct Consumer {
    pub tag: ConsumerTag,
    pub deliveries: UnboundedReceiver<Delivery>,
}

#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a fresh channel on this connection.
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError>;

    /// Close the connection. Transient queues and consumers go with it.
    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    async fn queue_delete(&self, queue: &str) -> Result<(), BrokerError>;

    /// Limit unsettled deliveries per consumer created on this channel afterwards.
    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    /// Non-mandatory publish: an unroutable message is silently dropped.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<(), BrokerError>;

    async fn basic_consume(&self, queue: &str) -> Result<Consumer, BrokerError>;

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError>;

    async fn basic_nack(&self, delivery_tag: DeliveryTag, requeue: bool)
    -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests;
