//! Delivery-outcome policy.
//!
//! Every handler resolves each delivery to exactly one [`AckOutcome`], and
//! the consumer loop turns it into exactly one broker settlement:
//!
//! | Outcome   | Broker action                                         |
//! |-----------|-------------------------------------------------------|
//! | `Accept`  | ack: the message is removed for good                  |
//! | `Retry`   | nack with requeue: the message goes back to the queue |
//! | `Discard` | nack without requeue: dead-lettered, or dropped       |

use std::fmt;

use tracing::debug;

use crate::broker::DeliveryTag;
use crate::client::Channel;
use crate::utils::error::BrokerError;

/// Terminal disposition of one delivery.
///
/// `AckOutcome::default()` is `Retry`. The consumer loop falls back to it when
/// a payload cannot be decoded or a handler panics, so a failure never loses
/// a message. That fallback is not the same as a handler asking for
/// `Discard`, and it can redeliver a permanently broken message forever
/// unless `SubscribeOptions::max_redeliveries` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckOutcome {
    /// Fully and correctly processed.
    Accept,
    /// Transient failure, or meant for another consumer of the same queue.
    #[default]
    Retry,
    /// Malformed, permanently inapplicable, or failed for good.
    Discard,
}

impl fmt::Display for AckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AckOutcome::Accept => "Ack",
            AckOutcome::Retry => "NackRequeue",
            AckOutcome::Discard => "NackDiscard",
        };
        f.write_str(label)
    }
}

/// Apply `outcome` to the delivery identified by `delivery_tag`.
pub async fn settle(
    channel: &dyn Channel,
    delivery_tag: DeliveryTag,
    outcome: AckOutcome,
) -> Result<(), BrokerError> {
    debug!("[{outcome}] delivery {delivery_tag}");
    match outcome {
        AckOutcome::Accept => channel.basic_ack(delivery_tag).await,
        AckOutcome::Retry => channel.basic_nack(delivery_tag, true).await,
        AckOutcome::Discard => channel.basic_nack(delivery_tag, false).await,
    }
}
