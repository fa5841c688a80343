//! The `error` module defines the error types raised by the broker and its
//! storage layer.
//!
//! `BrokerError` mirrors the failure classes of an AMQP-style broker
//! (`NOT_FOUND`, `PRECONDITION_FAILED`, `RESOURCE_LOCKED`, closed
//! channel/connection). It is serializable so the network broker can send it
//! back to a remote caller unchanged.

use serde::{Deserialize, Serialize};

/// Errors reported by a broker, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BrokerError {
    /// The named exchange, queue or channel does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A redeclaration conflicts with the existing entity's attributes.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An exclusive queue is owned by another connection.
    #[error("resource locked: {0}")]
    ResourceLocked(String),

    /// The delivery tag is unknown, already settled, or owned by another channel.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    /// The channel was closed before or during the call.
    #[error("channel {0} is closed")]
    ChannelClosed(u64),

    /// The connection to the broker is gone.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The broker refused a new connection.
    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    /// The wire protocol could not be spoken (bad frame, socket error).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Write-through to durable storage failed.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl BrokerError {
    /// True for errors that mean the whole connection is unusable.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionClosed(_)
                | BrokerError::ConnectionLimit(_)
                | BrokerError::Transport(_)
        )
    }
}

/// Errors raised by the `sled`-backed durable store.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<PersistenceError> for BrokerError {
    fn from(err: PersistenceError) -> Self {
        BrokerError::Persistence(err.to_string())
    }
}
