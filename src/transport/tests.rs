use crate::broker::{Broker, ExchangeKind, Publishing, QueueOptions};
use crate::client::{Connection, RemoteConnection};
use crate::config::Settings;
use crate::pubsub::{AckOutcome, SimpleQueueType, SubscribeOptions, publish_json, subscribe_json};
use crate::transport::message::{ClientFrame, ClientMessage, Reply, ServerMessage};
use crate::transport::websocket::serve;
use crate::utils::error::BrokerError;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn start_broker(settings: Settings) -> (Arc<Mutex<Broker>>, String) {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broker.clone(), settings));
    (broker, format!("ws://{addr}"))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[test]
fn test_client_frame_wire_shape() {
    let frame = ClientFrame {
        request_id: 7,
        request: ClientMessage::Qos {
            channel: 3,
            prefetch_count: 10,
        },
    };
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(
        value,
        json!({"request_id": 7, "type": "qos", "channel": 3, "prefetch_count": 10})
    );

    let parsed: ClientFrame =
        serde_json::from_value(json!({"request_id": 1, "type": "open_channel"})).unwrap();
    assert!(matches!(parsed.request, ClientMessage::OpenChannel));
    assert!(parsed.request.expects_reply());
    assert!(
        !ClientMessage::Ack {
            channel: 1,
            delivery_tag: 1
        }
        .expects_reply()
    );
}

#[tokio::test]
async fn test_raw_frames_open_channel_and_reject_foreign_channel() {
    let (_broker, url) = start_broker(Settings::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    ws.send(WsMessage::text(
        json!({"request_id": 1, "type": "open_channel"}).to_string(),
    ))
    .await
    .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    let message: ServerMessage = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    let channel = match message {
        ServerMessage::Reply {
            request_id: 1,
            result: Ok(Reply::ChannelOpened { channel }),
        } => channel,
        other => panic!("unexpected frame {other:?}"),
    };

    ws.send(WsMessage::text(
        json!({"request_id": 2, "type": "close_channel", "channel": channel + 100}).to_string(),
    ))
    .await
    .unwrap();
    let reply = ws.next().await.unwrap().unwrap();
    let message: ServerMessage = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert!(matches!(
        message,
        ServerMessage::Reply {
            request_id: 2,
            result: Err(BrokerError::ChannelClosed(_)),
        }
    ));
}

#[tokio::test]
async fn test_remote_connection_consume_and_ack() {
    let (broker, url) = start_broker(Settings::default()).await;
    let conn = RemoteConnection::connect(&url).await.unwrap();
    let ch = conn.create_channel().await.unwrap();

    ch.exchange_declare("peril_topic", ExchangeKind::Topic, true)
        .await
        .unwrap();
    let info = ch
        .queue_declare(
            "army_moves.alice",
            QueueOptions {
                exclusive: true,
                auto_delete: true,
                ..QueueOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(info.created);
    ch.queue_bind("army_moves.alice", "peril_topic", "army_moves.*")
        .await
        .unwrap();

    let mut consumer = ch.basic_consume("army_moves.alice").await.unwrap();
    ch.basic_publish(
        "peril_topic",
        "army_moves.bob",
        Publishing::new("application/json", b"{}".to_vec()),
    )
    .await
    .unwrap();

    let delivery = timeout(Duration::from_secs(2), consumer.deliveries.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.consumer_tag, consumer.tag);
    assert_eq!(delivery.message.routing_key, "army_moves.bob");
    assert_eq!(delivery.delivery_count, 1);

    ch.basic_ack(delivery.delivery_tag).await.unwrap();
    eventually(|| {
        broker
            .lock()
            .unwrap()
            .queue_stats("army_moves.alice")
            .is_some_and(|s| s.unacked == 0 && s.ready == 0)
    })
    .await;
}

#[tokio::test]
async fn test_remote_declare_conflict_comes_back_as_error() {
    let (_broker, url) = start_broker(Settings::default()).await;
    let conn = RemoteConnection::connect(&url).await.unwrap();
    let ch = conn.create_channel().await.unwrap();

    ch.exchange_declare("peril_direct", ExchangeKind::Direct, true)
        .await
        .unwrap();
    let err = ch
        .exchange_declare("peril_direct", ExchangeKind::Topic, true)
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::PreconditionFailed(_)));
}

#[tokio::test]
async fn test_typed_subscription_over_websocket() {
    let (_broker, url) = start_broker(Settings::default()).await;
    let conn = RemoteConnection::connect(&url).await.unwrap();
    let ch = conn.create_channel().await.unwrap();
    ch.exchange_declare("peril_direct", ExchangeKind::Direct, true)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    subscribe_json(
        &conn,
        "peril_direct",
        "pause.alice",
        "pause",
        SimpleQueueType::Transient,
        SubscribeOptions::default(),
        move |paused: bool| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(paused);
                AckOutcome::Accept
            }
        },
    )
    .await
    .unwrap();

    publish_json(ch.as_ref(), "peril_direct", "pause", &true)
        .await
        .unwrap();
    let paused = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(paused);
}

#[tokio::test]
async fn test_closing_socket_closes_broker_connection() {
    let (broker, url) = start_broker(Settings::default()).await;
    let conn = RemoteConnection::connect(&url).await.unwrap();
    let ch = conn.create_channel().await.unwrap();
    ch.queue_declare(
        "pause.alice",
        QueueOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueOptions::default()
        },
    )
    .await
    .unwrap();
    assert!(broker.lock().unwrap().has_queue("pause.alice"));

    conn.close().await.unwrap();
    assert!(conn.is_closed());
    assert!(ch.queue_delete("pause.alice").await.is_err());
    eventually(|| !broker.lock().unwrap().has_queue("pause.alice")).await;
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_sockets() {
    let mut settings = Settings::default();
    settings.broker.max_connections = 1;
    let (_broker, url) = start_broker(settings).await;

    let first = RemoteConnection::connect(&url).await.unwrap();
    first.create_channel().await.unwrap();

    let second = RemoteConnection::connect(&url).await.unwrap();
    assert!(second.create_channel().await.is_err());
    eventually(|| second.is_closed()).await;

    assert!(!first.is_closed());
    first.create_channel().await.unwrap();
}
