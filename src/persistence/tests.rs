use super::sled_store::{BindingDef, ExchangeDef, Persistence, QueueDef};
use crate::broker::exchange::ExchangeKind;
use crate::broker::message::Message;
use crate::broker::queue::QueueOptions;
use tempfile::tempdir;

fn message(key: &str, body: &[u8]) -> Message {
    Message {
        exchange: "game_logs".to_string(),
        routing_key: key.to_string(),
        content_type: "application/x-bincode".to_string(),
        payload: body.to_vec(),
        timestamp: 0,
        message_id: format!("id-{key}"),
    }
}

#[test]
fn test_store_and_load_messages_in_seq_order() {
    let dir = tempdir().unwrap();
    let store = Persistence::new(dir.path().to_str().unwrap(), None).unwrap();

    store.store_message("logs", 2, &message("game_logs.bob", b"b")).unwrap();
    store.store_message("logs", 1, &message("game_logs.alice", b"a")).unwrap();

    let loaded = store.load_messages("logs").unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].seq, 1);
    assert_eq!(loaded[0].message.payload, b"a".to_vec());
    assert_eq!(loaded[1].seq, 2);
}

#[test]
fn test_remove_message() {
    let store = Persistence::temporary().unwrap();
    store.store_message("logs", 7, &message("game_logs.alice", b"x")).unwrap();
    store.remove_message("logs", 7).unwrap();
    assert!(store.load_messages("logs").unwrap().is_empty());
}

#[test]
fn test_expired_messages_are_dropped_on_load() {
    let dir = tempdir().unwrap();
    // A negative TTL puts the expiry point in the future, so everything is stale.
    let store = Persistence::new(dir.path().to_str().unwrap(), Some(-10)).unwrap();
    store.store_message("logs", 1, &message("game_logs.alice", b"old")).unwrap();

    assert!(store.load_messages("logs").unwrap().is_empty());
}

#[test]
fn test_queue_and_exchange_definitions_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    {
        let store = Persistence::new(&path, None).unwrap();
        store
            .store_exchange(&ExchangeDef {
                name: "game_logs".to_string(),
                kind: ExchangeKind::Topic,
            })
            .unwrap();
        store
            .store_queue(&QueueDef {
                name: "game_logs".to_string(),
                options: QueueOptions {
                    durable: true,
                    dead_letter_exchange: Some("peril_dlx".to_string()),
                    ..QueueOptions::default()
                },
                bindings: vec![BindingDef {
                    exchange: "game_logs".to_string(),
                    routing_key: "game_logs.*".to_string(),
                }],
            })
            .unwrap();
        store.store_message("game_logs", 1, &message("game_logs.alice", b"hi")).unwrap();
        store.flush().unwrap();
    }

    let store = Persistence::new(&path, None).unwrap();
    let exchanges = store.load_exchanges().unwrap();
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].kind, ExchangeKind::Topic);

    let queues = store.load_queues().unwrap();
    assert_eq!(queues.len(), 1);
    assert_eq!(queues[0].bindings[0].routing_key, "game_logs.*");
    assert_eq!(store.load_messages("game_logs").unwrap().len(), 1);
}

#[test]
fn test_remove_queue_drops_its_messages() {
    let store = Persistence::temporary().unwrap();
    store
        .store_queue(&QueueDef {
            name: "war".to_string(),
            options: QueueOptions {
                durable: true,
                ..QueueOptions::default()
            },
            bindings: Vec::new(),
        })
        .unwrap();
    store.store_message("war", 1, &message("war.alice", b"w")).unwrap();

    store.remove_queue("war").unwrap();

    assert!(store.load_queues().unwrap().is_empty());
    assert!(store.load_messages("war").unwrap().is_empty());
}
