//! The `transport` module puts the broker on the network.
//!
//! It defines the JSON frames exchanged with `client::RemoteConnection` and
//! the WebSocket server that applies them to a shared `Broker`.

pub mod message;
pub mod websocket;

pub use websocket::{serve, start_websocket_server};

#[cfg(test)]
mod tests;
