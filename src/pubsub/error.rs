use crate::pubsub::codec::CodecError;
use crate::utils::error::BrokerError;

/// Errors surfaced by the typed pub/sub operations.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    /// The requested topology contradicts what already exists on the broker,
    /// such as a queue redeclared with different attributes.
    #[error("topology conflict: {0}")]
    Configuration(#[source] BrokerError),

    /// Declaring, binding or consuming failed for another reason.
    #[error("subscription setup failed: {0}")]
    Setup(#[source] BrokerError),

    /// The broker refused a publish.
    #[error("publish failed: {0}")]
    Transport(#[source] BrokerError),

    #[error(transparent)]
    Encode(#[from] CodecError),

    /// The connection is gone. Not recoverable at this layer.
    #[error("connection lost: {0}")]
    Connection(#[source] BrokerError),
}

impl PubSubError {
    pub(crate) fn setup(err: BrokerError) -> Self {
        match err {
            BrokerError::PreconditionFailed(_) | BrokerError::ResourceLocked(_) => {
                PubSubError::Configuration(err)
            }
            err if err.is_connection_level() => PubSubError::Connection(err),
            err => PubSubError::Setup(err),
        }
    }

    pub(crate) fn transport(err: BrokerError) -> Self {
        if err.is_connection_level() {
            PubSubError::Connection(err)
        } else {
            PubSubError::Transport(err)
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PubSubError::Configuration(_))
    }
}
