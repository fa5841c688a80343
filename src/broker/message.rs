//! Message definitions for the broker
//!
//! `Message` is the envelope the broker stores and routes. It is what a
//! publisher's `Publishing` becomes once the broker has stamped it, and what a
//! consumer receives inside a `Delivery`.
//!
//! Notes on fields:
//! - `exchange` / `routing_key`: where the message was published, kept
//!   unchanged when the message is dead-lettered
//! - `content_type`: encoding marker (`application/json`, `application/x-bincode`)
//! - `payload`: opaque bytes; the broker never looks inside
//! - `timestamp`: milliseconds since UNIX epoch; set by the broker upon publish
//! - `message_id`: unique id set by the broker upon publish

use serde::{Deserialize, Serialize};

pub type ConnectionId = u64;
pub type ChannelId = u64;
pub type DeliveryTag = u64;
pub type ConsumerTag = String;

/// What a publisher hands to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publishing {
    pub content_type: String,
    pub payload: Vec<u8>,
}

impl Publishing {
    pub fn new(content_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub timestamp: i64,
    pub message_id: String,
}

/// A message handed to one consumer.
///
/// The delivery stays unsettled until the consumer acks or nacks
/// `delivery_tag` on the channel it consumed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub delivery_tag: DeliveryTag,
    pub consumer_tag: ConsumerTag,
    /// True when this message was delivered at least once before.
    pub redelivered: bool,
    /// How many times the broker has handed this message out, this time included.
    pub delivery_count: u32,
    pub message: Message,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }
}
