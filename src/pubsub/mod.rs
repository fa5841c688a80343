//! Typed publish/subscribe over the broker.
//!
//! - `topology`: declare a queue and bind it in one step
//! - `publish`: encode a value and send it to an exchange
//! - `subscribe`: declare, bind, consume and settle every delivery
//! - `ack`: the outcome a handler returns and how it is settled
//! - `codec`: JSON and bincode payload encodings

pub mod ack;
pub mod codec;
pub mod error;
pub mod publish;
pub mod subscribe;
pub mod topology;

pub use ack::{AckOutcome, settle};
pub use codec::{BincodeCodec, Codec, CodecError, JsonCodec};
pub use error::PubSubError;
pub use publish::{Publisher, publish_bincode, publish_json, publish_with};
pub use subscribe::{SubscribeOptions, Subscription, subscribe, subscribe_bincode, subscribe_json};
pub use topology::{SimpleQueueType, declare_and_bind};
