//! The `persistence` module provides the durable half of the broker.
//!
//! Durable exchanges, durable queues (with their bindings) and the messages
//! waiting in durable queues are written through to `sled`, an embedded
//! key-value store, so they survive a broker restart. Transient queues never
//! touch it.

pub mod sled_store;

pub use sled_store::{BindingDef, ExchangeDef, Persistence, QueueDef, StoredMessage};

#[cfg(test)]
mod tests;
