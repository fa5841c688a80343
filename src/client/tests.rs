use crate::broker::{Broker, ExchangeKind, Publishing, QueueOptions};
use crate::client::{Connection, LocalConnection};
use crate::utils::error::BrokerError;
use std::sync::{Arc, Mutex};

fn transient() -> QueueOptions {
    QueueOptions {
        exclusive: true,
        auto_delete: true,
        ..QueueOptions::default()
    }
}

#[tokio::test]
async fn test_local_channel_round_trip() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let conn = LocalConnection::open(broker.clone()).unwrap();
    let ch = conn.create_channel().await.unwrap();

    ch.exchange_declare("peril_direct", ExchangeKind::Direct, true)
        .await
        .unwrap();
    ch.queue_declare("pause.alice", transient()).await.unwrap();
    ch.queue_bind("pause.alice", "peril_direct", "pause")
        .await
        .unwrap();
    let mut consumer = ch.basic_consume("pause.alice").await.unwrap();

    ch.basic_publish(
        "peril_direct",
        "pause",
        Publishing::new("application/json", b"{\"is_paused\":true}".to_vec()),
    )
    .await
    .unwrap();
    let delivery = consumer.deliveries.try_recv().unwrap();
    assert_eq!(delivery.consumer_tag, consumer.tag);
    ch.basic_ack(delivery.delivery_tag).await.unwrap();

    let err = ch.basic_ack(delivery.delivery_tag).await.unwrap_err();
    assert_eq!(err, BrokerError::UnknownDeliveryTag(delivery.delivery_tag));
}

#[tokio::test]
async fn test_closed_channel_rejects_operations() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let conn = LocalConnection::open(broker.clone()).unwrap();
    let ch = conn.create_channel().await.unwrap();
    ch.close().await.unwrap();

    let err = ch.queue_declare("q", transient()).await.unwrap_err();
    assert_eq!(err, BrokerError::ChannelClosed(ch.id()));
    assert!(
        ch.basic_publish("", "q", Publishing::new("text/plain", Vec::new()))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_dropping_connection_removes_its_transient_queues() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    {
        let conn = LocalConnection::open(broker.clone()).unwrap();
        let ch = conn.create_channel().await.unwrap();
        ch.queue_declare("army_moves.alice", transient())
            .await
            .unwrap();
        assert!(broker.lock().unwrap().has_queue("army_moves.alice"));
    }
    assert!(!broker.lock().unwrap().has_queue("army_moves.alice"));
}

#[tokio::test]
async fn test_closed_connection_cannot_open_channels() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let conn = LocalConnection::open(broker).unwrap();
    conn.close().await.unwrap();
    assert!(matches!(
        conn.create_channel().await,
        Err(BrokerError::ConnectionClosed(_))
    ));
}
