//! # Peril
//!
//! `peril` is a typed publish/subscribe layer over an AMQP-style broker, and
//! the turn-based strategy game built on top of it.
//!
//! ## Core Modules
//!
//! - `pubsub`: typed publishers and subscribers, queue topology, and the
//!   accept/retry/discard outcome every delivery is settled with.
//! - `broker`: the in-process broker: exchanges, queues, bindings, consumers,
//!   acknowledgements and dead-lettering.
//! - `client`: the `Connection`/`Channel` traits `pubsub` talks to, with a
//!   local and a WebSocket implementation.
//! - `transport`: the WebSocket server exposing a broker to other processes.
//! - `persistence`: `sled` storage for durable exchanges, queues and messages.
//! - `game`: Peril's messages, rules, handlers, server and player.
//! - `config`: loading settings from files and the environment.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod game;
pub mod persistence;
pub mod pubsub;
pub mod transport;
pub mod utils;
