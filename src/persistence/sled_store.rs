use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::broker::exchange::ExchangeKind;
use crate::broker::message::Message;
use crate::broker::queue::QueueOptions;
use crate::utils::error::PersistenceError;

const EXCHANGES_TREE: &str = "exchanges";
const QUEUES_TREE: &str = "queues";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDef {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BindingDef {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct QueueDef {
    pub name: String,
    pub options: QueueOptions,
    pub bindings: Vec<BindingDef>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredMessage {
    pub seq: u64,
    pub message: Message,
    pub stored_at: i64,
}

#[derive(Clone)]
pub struct Persistence {
    db: Db,
    ttl_seconds: Option<i64>,
}

impl Persistence {
    pub fn new(path: &str, ttl_seconds: Option<i64>) -> Result<Self, PersistenceError> {
        let db = sled::open(path)?;
        Ok(Self { db, ttl_seconds })
    }

    /// A store that lives only as long as this handle; used by tests and ephemeral brokers.
    pub fn temporary() -> Result<Self, PersistenceError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            ttl_seconds: None,
        })
    }

    pub fn store_exchange(&self, def: &ExchangeDef) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(EXCHANGES_TREE)?;
        tree.insert(def.name.as_bytes(), serde_json::to_vec(def)?)?;
        Ok(())
    }

    pub fn load_exchanges(&self) -> Result<Vec<ExchangeDef>, PersistenceError> {
        let tree = self.db.open_tree(EXCHANGES_TREE)?;
        load_all(&tree)
    }

    pub fn store_queue(&self, def: &QueueDef) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(QUEUES_TREE)?;
        tree.insert(def.name.as_bytes(), serde_json::to_vec(def)?)?;
        Ok(())
    }

    /// Forget a queue definition together with every message stored for it.
    pub fn remove_queue(&self, name: &str) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(QUEUES_TREE)?;
        tree.remove(name.as_bytes())?;
        self.db.drop_tree(messages_tree(name))?;
        Ok(())
    }

    pub fn load_queues(&self) -> Result<Vec<QueueDef>, PersistenceError> {
        let tree = self.db.open_tree(QUEUES_TREE)?;
        load_all(&tree)
    }

    pub fn store_message(
        &self,
        queue: &str,
        seq: u64,
        message: &Message,
    ) -> Result<(), PersistenceError> {
        let stored = StoredMessage {
            seq,
            message: message.clone(),
            stored_at: Utc::now().timestamp(),
        };
        let tree = self.db.open_tree(messages_tree(queue))?;
        tree.insert(seq.to_be_bytes(), serde_json::to_vec(&stored)?)?;
        Ok(())
    }

    pub fn remove_message(&self, queue: &str, seq: u64) -> Result<(), PersistenceError> {
        let tree = self.db.open_tree(messages_tree(queue))?;
        tree.remove(seq.to_be_bytes())?;
        Ok(())
    }

    /// Messages of `queue` in publish order, expired ones removed first.
    pub fn load_messages(&self, queue: &str) -> Result<Vec<StoredMessage>, PersistenceError> {
        self.cleanup_old_messages(queue)?;
        let tree = self.db.open_tree(messages_tree(queue))?;
        load_all(&tree)
    }

    fn cleanup_old_messages(&self, queue: &str) -> Result<(), PersistenceError> {
        let Some(ttl) = self.ttl_seconds else {
            return Ok(());
        };
        let expiry_time = Utc::now().timestamp() - ttl;

        let tree = self.db.open_tree(messages_tree(queue))?;
        let stored: Vec<StoredMessage> = load_all(&tree)?;
        for msg in stored.into_iter().filter(|m| m.stored_at < expiry_time) {
            tree.remove(msg.seq.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }
}

fn messages_tree(queue: &str) -> String {
    format!("queue:{queue}")
}

fn load_all<T: serde::de::DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, PersistenceError> {
    let mut out = Vec::new();
    for entry in tree.iter() {
        let (_, value) = entry?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}
