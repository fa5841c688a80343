//! Wire frames exchanged between a `RemoteConnection` and the network broker.
//!
//! Every frame is one JSON text message. Client frames carry a `request_id`
//! that the matching `reply` echoes back; `publish`, `ack` and `nack` only get
//! a reply when the broker rejects them.

use serde::{Deserialize, Serialize};

use crate::broker::{
    ChannelId, ConsumerTag, Delivery, DeliveryTag, ExchangeKind, Publishing, QueueInfo,
    QueueOptions,
};
use crate::utils::error::BrokerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub request_id: u64,
    #[serde(flatten)]
    pub request: ClientMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    OpenChannel,
    CloseChannel {
        channel: ChannelId,
    },
    DeclareExchange {
        channel: ChannelId,
        exchange: String,
        kind: ExchangeKind,
        durable: bool,
    },
    DeclareQueue {
        channel: ChannelId,
        queue: String,
        options: QueueOptions,
    },
    BindQueue {
        channel: ChannelId,
        queue: String,
        exchange: String,
        routing_key: String,
    },
    DeleteQueue {
        channel: ChannelId,
        queue: String,
    },
    Qos {
        channel: ChannelId,
        prefetch_count: u16,
    },
    Consume {
        channel: ChannelId,
        queue: String,
        consumer_tag: ConsumerTag,
    },
    Publish {
        channel: ChannelId,
        exchange: String,
        routing_key: String,
        publishing: Publishing,
    },
    Ack {
        channel: ChannelId,
        delivery_tag: DeliveryTag,
    },
    Nack {
        channel: ChannelId,
        delivery_tag: DeliveryTag,
        requeue: bool,
    },
}

impl ClientMessage {
    /// Whether the broker answers this request when it succeeds.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            ClientMessage::Publish { .. } | ClientMessage::Ack { .. } | ClientMessage::Nack { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Reply {
        request_id: u64,
        result: Result<Reply, BrokerError>,
    },
    Deliver {
        delivery: Delivery,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Done,
    ChannelOpened { channel: ChannelId },
    QueueDeclared { info: QueueInfo },
    ConsumeOk { consumer_tag: ConsumerTag },
}
