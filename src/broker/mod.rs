//! The broker the pub/sub layer runs on.
//!
//! It follows the AMQP 0-9-1 model closely enough for the core to rely on
//! the usual guarantees: exchanges route by key into bound queues, each
//! delivery stays unsettled until it is acked or nacked exactly once, and
//! nacked-without-requeue messages move to a dead-letter exchange.

pub mod engine;
pub mod exchange;
pub mod message;
pub mod queue;

pub use engine::{Broker, DEFAULT_EXCHANGE};
pub use exchange::ExchangeKind;
pub use message::{ChannelId, ConnectionId, ConsumerTag, Delivery, DeliveryTag, Message, Publishing};
pub use queue::{QueueInfo, QueueOptions, QueueStats};

#[cfg(test)]
mod tests;
