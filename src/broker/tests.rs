use super::Broker;
use super::exchange::{Exchange, ExchangeKind, topic_matches};
use super::message::{ChannelId, Delivery, Publishing};
use super::queue::QueueOptions;
use crate::persistence::Persistence;
use crate::utils::error::BrokerError;
use tokio::sync::mpsc;

fn durable() -> QueueOptions {
    QueueOptions {
        durable: true,
        ..QueueOptions::default()
    }
}

fn transient() -> QueueOptions {
    QueueOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueOptions::default()
    }
}

fn text(body: &str) -> Publishing {
    Publishing::new("application/json", body.as_bytes().to_vec())
}

fn setup() -> (Broker, ChannelId) {
    let mut broker = Broker::new();
    let conn = broker.open_connection();
    let ch = broker.open_channel(conn).unwrap();
    (broker, ch)
}

fn attach(
    broker: &mut Broker,
    ch: ChannelId,
    queue: &str,
) -> mpsc::UnboundedReceiver<Delivery> {
    let (tx, rx) = mpsc::unbounded_channel();
    broker.consume(ch, queue, "", tx).unwrap();
    rx
}

#[test]
fn test_topic_pattern_matching() {
    assert!(topic_matches("game_logs.*", "game_logs.alice"));
    assert!(!topic_matches("game_logs.*", "game_logs"));
    assert!(!topic_matches("game_logs.*", "game_logs.alice.extra"));
    assert!(topic_matches("war.#", "war"));
    assert!(topic_matches("war.#", "war.alice.bob"));
    assert!(topic_matches("#", "anything.at.all"));
    assert!(topic_matches("*.moves", "army.moves"));
    assert!(!topic_matches("game_logs.bob", "game_logs.alice"));
}

#[test]
fn test_exchange_bind_is_idempotent_and_routes_once() {
    let mut exchange = Exchange::new("peril_topic", ExchangeKind::Topic, true);
    assert!(exchange.bind("q", "army_moves.*"));
    assert!(!exchange.bind("q", "army_moves.*"));
    exchange.bind("q", "army_moves.alice");

    assert_eq!(exchange.route("army_moves.alice"), vec!["q".to_string()]);
    exchange.unbind_queue("q");
    assert!(exchange.route("army_moves.alice").is_empty());
}

#[test]
fn test_fanout_ignores_routing_key() {
    let mut exchange = Exchange::new("peril_dlx", ExchangeKind::Fanout, true);
    exchange.bind("peril_dlq", "");
    assert_eq!(exchange.route("army_moves.bob"), vec!["peril_dlq".to_string()]);
}

#[test]
fn test_exchange_redeclare() {
    let mut broker = Broker::new();
    broker
        .declare_exchange("peril_direct", ExchangeKind::Direct, true)
        .unwrap();
    broker
        .declare_exchange("peril_direct", ExchangeKind::Direct, true)
        .unwrap();
    let err = broker
        .declare_exchange("peril_direct", ExchangeKind::Topic, true)
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[test]
fn test_queue_redeclare_identical_is_ok() {
    let (mut broker, ch) = setup();
    let first = broker.declare_queue(ch, "game_logs", durable()).unwrap();
    assert!(first.created);
    let second = broker.declare_queue(ch, "game_logs", durable()).unwrap();
    assert!(!second.created);
    assert_eq!(second.name, "game_logs");
}

#[test]
fn test_queue_redeclare_with_conflicting_durability_fails() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "pause.alice", transient()).unwrap();
    let err = broker.declare_queue(ch, "pause.alice", durable()).unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[test]
fn test_exclusive_queue_is_locked_to_its_connection() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "pause.alice", transient()).unwrap();

    let other = broker.open_connection();
    let other_ch = broker.open_channel(other).unwrap();
    let err = broker
        .declare_queue(other_ch, "pause.alice", transient())
        .unwrap_err();
    assert!(matches!(err, BrokerError::ResourceLocked(_)));
}

#[test]
fn test_empty_queue_name_is_generated() {
    let (mut broker, ch) = setup();
    let info = broker.declare_queue(ch, "", transient()).unwrap();
    assert!(info.name.starts_with("amq.gen-"));
    assert!(broker.has_queue(&info.name));
}

#[test]
fn test_bind_requires_existing_exchange_and_queue() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    assert!(matches!(
        broker.bind_queue(ch, "q", "missing", "k"),
        Err(BrokerError::NotFound(_))
    ));
    broker
        .declare_exchange("peril_topic", ExchangeKind::Topic, true)
        .unwrap();
    assert!(matches!(
        broker.bind_queue(ch, "missing", "peril_topic", "k"),
        Err(BrokerError::NotFound(_))
    ));
}

#[test]
fn test_publish_to_unknown_exchange_fails() {
    let (mut broker, _) = setup();
    let err = broker.publish("nope", "k", text("{}")).unwrap_err();
    assert!(matches!(err, BrokerError::NotFound(_)));
}

#[test]
fn test_unroutable_publish_is_dropped() {
    let (mut broker, _) = setup();
    broker
        .declare_exchange("peril_direct", ExchangeKind::Direct, true)
        .unwrap();
    assert_eq!(broker.publish("peril_direct", "pause", text("{}")).unwrap(), 0);
}

#[test]
fn test_default_exchange_routes_by_queue_name() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "direct_q", durable()).unwrap();
    assert_eq!(broker.publish("", "direct_q", text("x")).unwrap(), 1);
    assert_eq!(broker.queue_stats("direct_q").unwrap().ready, 1);
}

#[test]
fn test_topic_fan_out_respects_patterns() {
    let (mut broker, ch) = setup();
    broker
        .declare_exchange("game_logs", ExchangeKind::Topic, true)
        .unwrap();
    broker.declare_queue(ch, "all_logs", durable()).unwrap();
    broker.declare_queue(ch, "bob_logs", durable()).unwrap();
    broker
        .bind_queue(ch, "all_logs", "game_logs", "game_logs.*")
        .unwrap();
    broker
        .bind_queue(ch, "bob_logs", "game_logs", "game_logs.bob")
        .unwrap();

    let routed = broker
        .publish("game_logs", "game_logs.alice", text("hi"))
        .unwrap();
    assert_eq!(routed, 1);
    assert_eq!(broker.queue_stats("all_logs").unwrap().ready, 1);
    assert_eq!(broker.queue_stats("bob_logs").unwrap().ready, 0);
}

#[test]
fn test_ack_removes_message() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    broker.publish("", "q", text("hello")).unwrap();

    let delivery = rx.try_recv().unwrap();
    assert_eq!(delivery.message.payload, b"hello".to_vec());
    assert_eq!(delivery.delivery_count, 1);
    assert!(!delivery.redelivered);
    assert_eq!(broker.queue_stats("q").unwrap().unacked, 1);

    broker.ack(ch, delivery.delivery_tag).unwrap();
    let stats = broker.queue_stats("q").unwrap();
    assert_eq!(stats.ready, 0);
    assert_eq!(stats.unacked, 0);
}

#[test]
fn test_settlement_happens_at_most_once() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    broker.publish("", "q", text("once")).unwrap();
    let delivery = rx.try_recv().unwrap();

    broker.ack(ch, delivery.delivery_tag).unwrap();
    assert_eq!(
        broker.ack(ch, delivery.delivery_tag),
        Err(BrokerError::UnknownDeliveryTag(delivery.delivery_tag))
    );
    assert!(broker.nack(ch, delivery.delivery_tag, true).is_err());
    assert_eq!(broker.queue_stats("q").unwrap().ready, 0);
}

#[test]
fn test_settling_on_another_channel_is_rejected() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    broker.publish("", "q", text("mine")).unwrap();
    let delivery = rx.try_recv().unwrap();

    let conn = broker.channel_connection(ch).unwrap();
    let other = broker.open_channel(conn).unwrap();
    assert!(broker.ack(other, delivery.delivery_tag).is_err());
    assert_eq!(broker.queue_stats("q").unwrap().unacked, 1);
    broker.ack(ch, delivery.delivery_tag).unwrap();
}

#[test]
fn test_nack_with_requeue_redelivers() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    broker.publish("", "q", text("again")).unwrap();

    let first = rx.try_recv().unwrap();
    broker.nack(ch, first.delivery_tag, true).unwrap();

    let second = rx.try_recv().unwrap();
    assert_eq!(second.message, first.message);
    assert!(second.redelivered);
    assert_eq!(second.delivery_count, 2);
    assert_ne!(second.delivery_tag, first.delivery_tag);
}

#[test]
fn test_nack_without_requeue_dead_letters_unmodified_once() {
    let (mut broker, ch) = setup();
    broker
        .declare_exchange("peril_dlx", ExchangeKind::Fanout, true)
        .unwrap();
    broker.declare_queue(ch, "peril_dlq", durable()).unwrap();
    broker.bind_queue(ch, "peril_dlq", "peril_dlx", "").unwrap();
    broker
        .declare_exchange("peril_topic", ExchangeKind::Topic, true)
        .unwrap();
    let options = QueueOptions {
        dead_letter_exchange: Some("peril_dlx".to_string()),
        ..transient()
    };
    broker.declare_queue(ch, "army_moves.alice", options).unwrap();
    broker
        .bind_queue(ch, "army_moves.alice", "peril_topic", "army_moves.*")
        .unwrap();
    let mut rx = attach(&mut broker, ch, "army_moves.alice");

    broker
        .publish("peril_topic", "army_moves.alice", text("{\"bad\":true}"))
        .unwrap();
    let delivery = rx.try_recv().unwrap();
    broker.nack(ch, delivery.delivery_tag, false).unwrap();

    assert_eq!(broker.queue_stats("army_moves.alice").unwrap().ready, 0);
    assert_eq!(broker.queue_stats("peril_dlq").unwrap().ready, 1);

    let mut dlq = attach(&mut broker, ch, "peril_dlq");
    let dead = dlq.try_recv().unwrap();
    assert_eq!(dead.message, delivery.message);
    assert!(dlq.try_recv().is_err());
}

#[test]
fn test_nack_without_dead_letter_exchange_drops() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    broker.publish("", "q", text("gone")).unwrap();
    let delivery = rx.try_recv().unwrap();
    broker.nack(ch, delivery.delivery_tag, false).unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.queue_stats("q").unwrap().ready, 0);
}

#[test]
fn test_prefetch_bounds_unsettled_deliveries() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    broker.set_prefetch(ch, 2).unwrap();
    let mut rx = attach(&mut broker, ch, "q");
    for i in 0..5 {
        broker.publish("", "q", text(&i.to_string())).unwrap();
    }

    let a = rx.try_recv().unwrap();
    let _b = rx.try_recv().unwrap();
    assert!(rx.try_recv().is_err());
    assert_eq!(broker.queue_stats("q").unwrap().ready, 3);

    broker.ack(ch, a.delivery_tag).unwrap();
    let c = rx.try_recv().unwrap();
    assert_eq!(c.message.payload, b"2".to_vec());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_round_robin_between_consumers() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "war", durable()).unwrap();
    let mut first = attach(&mut broker, ch, "war");
    let mut second = attach(&mut broker, ch, "war");

    broker.publish("", "war", text("1")).unwrap();
    broker.publish("", "war", text("2")).unwrap();

    assert_eq!(first.try_recv().unwrap().message.payload, b"1".to_vec());
    assert_eq!(second.try_recv().unwrap().message.payload, b"2".to_vec());
}

#[test]
fn test_close_channel_requeues_in_order_and_auto_deletes() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "shared", durable()).unwrap();
    let mut rx = attach(&mut broker, ch, "shared");
    broker.publish("", "shared", text("a")).unwrap();
    broker.publish("", "shared", text("b")).unwrap();
    let _ = rx.try_recv().unwrap();
    let _ = rx.try_recv().unwrap();

    broker.declare_queue(ch, "pause.alice", transient()).unwrap();
    let _pause_rx = attach(&mut broker, ch, "pause.alice");

    broker.close_channel(ch);

    assert!(!broker.has_queue("pause.alice"));
    let stats = broker.queue_stats("shared").unwrap();
    assert_eq!(stats.ready, 2);
    assert_eq!(stats.unacked, 0);
    assert_eq!(stats.consumers, 0);

    let conn = broker.open_connection();
    let ch2 = broker.open_channel(conn).unwrap();
    let mut rx2 = attach(&mut broker, ch2, "shared");
    let first = rx2.try_recv().unwrap();
    assert_eq!(first.message.payload, b"a".to_vec());
    assert!(first.redelivered);
}

#[test]
fn test_close_connection_deletes_exclusive_queues() {
    let (mut broker, ch) = setup();
    let conn = broker.channel_connection(ch).unwrap();
    broker.declare_queue(ch, "pause.alice", transient()).unwrap();
    broker.declare_queue(ch, "game_logs", durable()).unwrap();

    broker.close_connection(conn);

    assert!(!broker.has_queue("pause.alice"));
    assert!(broker.has_queue("game_logs"));
    assert!(matches!(
        broker.open_channel(conn),
        Err(BrokerError::ConnectionClosed(_))
    ));
}

#[test]
fn test_dropped_receiver_cancels_consumer() {
    let (mut broker, ch) = setup();
    broker.declare_queue(ch, "q", durable()).unwrap();
    let rx = attach(&mut broker, ch, "q");
    drop(rx);

    broker.publish("", "q", text("orphan")).unwrap();
    let stats = broker.queue_stats("q").unwrap();
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.ready, 1);
}

#[test]
fn test_durable_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();
    {
        let mut broker = Broker::with_persistence(Persistence::new(&path, None).unwrap()).unwrap();
        let conn = broker.open_connection();
        let ch = broker.open_channel(conn).unwrap();
        broker
            .declare_exchange("game_logs", ExchangeKind::Topic, true)
            .unwrap();
        broker.declare_queue(ch, "game_logs", durable()).unwrap();
        broker.declare_queue(ch, "pause.alice", transient()).unwrap();
        broker
            .bind_queue(ch, "game_logs", "game_logs", "game_logs.*")
            .unwrap();
        broker
            .publish("game_logs", "game_logs.alice", text("first"))
            .unwrap();
        broker
            .publish("game_logs", "game_logs.bob", text("second"))
            .unwrap();

        let mut rx = attach(&mut broker, ch, "game_logs");
        let delivery = rx.try_recv().unwrap();
        broker.ack(ch, delivery.delivery_tag).unwrap();
    }

    let mut broker = Broker::with_persistence(Persistence::new(&path, None).unwrap()).unwrap();
    assert!(broker.has_exchange("game_logs"));
    assert!(!broker.has_queue("pause.alice"));
    // The unsettled "second" message comes back; the acked one does not.
    assert_eq!(broker.queue_stats("game_logs").unwrap().ready, 1);

    // Recovered bindings still route.
    broker
        .publish("game_logs", "game_logs.carol", text("third"))
        .unwrap();
    assert_eq!(broker.queue_stats("game_logs").unwrap().ready, 2);
}
