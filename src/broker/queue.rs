//! Queue state
//!
//! A `Queue` is an ordered buffer of ready messages plus the list of consumer
//! tags attached to it. Messages that have been handed to a consumer are not
//! held here; the broker tracks them as unsettled until they are acked or
//! nacked.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::broker::message::{ConnectionId, ConsumerTag, Message};

/// Declaration attributes. Two declarations of the same queue must agree on all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Survives a broker restart.
    pub durable: bool,
    /// Only usable by the declaring connection, deleted when it closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
    /// Exchange receiving messages nacked without requeue.
    pub dead_letter_exchange: Option<String>,
}

/// Result of a queue declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: usize,
    pub consumer_count: usize,
    /// True when this declaration created the queue.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    pub consumers: usize,
}

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub seq: u64,
    pub message: Message,
    pub delivery_count: u32,
}

#[derive(Debug)]
pub struct Queue {
    pub name: String,
    pub options: QueueOptions,
    pub owner: Option<ConnectionId>,
    pub ready: VecDeque<QueuedMessage>,
    pub consumers: Vec<ConsumerTag>,
    next_consumer: usize,
}

impl Queue {
    pub fn new(name: &str, options: QueueOptions, owner: Option<ConnectionId>) -> Self {
        Self {
            name: name.to_string(),
            options,
            owner,
            ready: VecDeque::new(),
            consumers: Vec::new(),
            next_consumer: 0,
        }
    }

    pub fn info(&self, created: bool) -> QueueInfo {
        QueueInfo {
            name: self.name.clone(),
            message_count: self.ready.len(),
            consumer_count: self.consumers.len(),
            created,
        }
    }

    pub fn add_consumer(&mut self, tag: ConsumerTag) {
        self.consumers.push(tag);
    }

    pub fn remove_consumer(&mut self, tag: &str) {
        self.consumers.retain(|t| t != tag);
        if self.next_consumer >= self.consumers.len() {
            self.next_consumer = 0;
        }
    }

    /// Consumer tags in round-robin order, starting after the last one served.
    pub fn consumers_in_turn(&self) -> Vec<ConsumerTag> {
        let n = self.consumers.len();
        (0..n)
            .map(|i| self.consumers[(self.next_consumer + i) % n].clone())
            .collect()
    }

    /// Record that `tag` was just served so the next dispatch starts after it.
    pub fn advance_past(&mut self, tag: &str) {
        if let Some(idx) = self.consumers.iter().position(|t| t == tag) {
            self.next_consumer = (idx + 1) % self.consumers.len();
        }
    }
}
