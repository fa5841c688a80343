//! Codec trait and implementations for the payloads the pub/sub layer carries.
//!
//! A publisher encodes with one codec and tags the message with that codec's
//! content type; the matching subscriber decodes with the same codec. Each
//! message kind picks one:
//!
//! - [`JsonCodec`]: structured text, `application/json`
//! - [`BincodeCodec`]: compact binary, `application/x-bincode`

use serde::{Serialize, de::DeserializeOwned};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Turning a value into bytes failed.
    #[error("encode failed: {0}")]
    Encode(#[source] BoxError),

    /// The bytes are malformed, truncated, or not the expected type.
    #[error("decode failed: {0}")]
    Decode(#[source] BoxError),
}

pub trait Codec: Send + Sync + 'static {
    /// Content-type marker attached to every message this codec encodes.
    const CONTENT_TYPE: &'static str;

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const CONTENT_TYPE: &'static str = "application/json";

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    const CONTENT_TYPE: &'static str = "application/x-bincode";

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(value).map_err(|e| CodecError::Encode(e))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        bincode::deserialize(data).map_err(|e| CodecError::Decode(e))
    }
}
