use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::broker::Publishing;
use crate::client::Channel;
use crate::pubsub::codec::{BincodeCodec, Codec, JsonCodec};
use crate::pubsub::error::PubSubError;

/// Encodes values with one codec and publishes them on a shared channel.
#[derive(Clone)]
pub struct Publisher<C: Codec> {
    channel: Arc<dyn Channel>,
    codec: C,
}

impl<C: Codec> Publisher<C> {
    pub fn new(channel: Arc<dyn Channel>, codec: C) -> Self {
        Self { channel, codec }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), PubSubError> {
        publish_with(self.channel.as_ref(), &self.codec, exchange, routing_key, value).await
    }
}

impl<C: Codec> fmt::Debug for Publisher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("channel", &self.channel.id())
            .field("content_type", &C::CONTENT_TYPE)
            .finish()
    }
}

/// Encode `value` and publish it. Nothing is sent if encoding fails.
///
/// A broker that accepts the publish but routes it nowhere is not an error.
pub async fn publish_with<C: Codec, T: Serialize + ?Sized>(
    channel: &dyn Channel,
    codec: &C,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError> {
    let payload = codec.encode(value)?;
    channel
        .basic_publish(exchange, routing_key, Publishing::new(C::CONTENT_TYPE, payload))
        .await
        .map_err(PubSubError::transport)
}

pub async fn publish_json<T: Serialize + ?Sized>(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError> {
    publish_with(channel, &JsonCodec, exchange, routing_key, value).await
}

pub async fn publish_bincode<T: Serialize + ?Sized>(
    channel: &dyn Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), PubSubError> {
    publish_with(channel, &BincodeCodec, exchange, routing_key, value).await
}
