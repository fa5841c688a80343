use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{
    ChannelId, ConsumerTag, Delivery, DeliveryTag, ExchangeKind, Publishing, QueueInfo,
    QueueOptions,
};
use crate::client::{Channel, Connection, Consumer};
use crate::transport::message::{ClientFrame, ClientMessage, Reply, ServerMessage};
use crate::utils::error::BrokerError;

type PendingReplies = HashMap<u64, oneshot::Sender<Result<Reply, BrokerError>>>;

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<PendingReplies>,
    consumers: Mutex<HashMap<ConsumerTag, (ChannelId, mpsc::UnboundedSender<Delivery>)>>,
    next_request: AtomicU64,
    closed: AtomicBool,
}

#[derive(Debug)]
struct Inner {
    outbound: mpsc::UnboundedSender<WsMessage>,
    shared: Arc<Shared>,
}

impl Inner {
    fn closed_error() -> BrokerError {
        BrokerError::ConnectionClosed("socket to broker is closed".to_string())
    }

    fn write(&self, frame: &ClientFrame) -> Result<(), BrokerError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Self::closed_error());
        }
        let json =
            serde_json::to_string(frame).map_err(|e| BrokerError::Transport(e.to_string()))?;
        self.outbound
            .send(WsMessage::text(json))
            .map_err(|_| Self::closed_error())
    }

    /// Send a request and wait for the broker's answer.
    async fn call(&self, request: ClientMessage) -> Result<Reply, BrokerError> {
        let request_id = self.shared.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(request_id, tx);
        }
        if let Err(e) = self.write(&ClientFrame {
            request_id,
            request,
        }) {
            if let Ok(mut pending) = self.shared.pending.lock() {
                pending.remove(&request_id);
            }
            return Err(e);
        }
        rx.await.map_err(|_| Self::closed_error())?
    }

    /// Send a request the broker only answers when it fails.
    fn cast(&self, request: ClientMessage) -> Result<(), BrokerError> {
        let request_id = self.shared.next_request.fetch_add(1, Ordering::SeqCst) + 1;
        self.write(&ClientFrame {
            request_id,
            request,
        })
    }
}

impl Shared {
    fn dispatch(&self, message: ServerMessage) {
        match message {
            ServerMessage::Reply { request_id, result } => {
                let waiter = self
                    .pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.remove(&request_id));
                match (waiter, result) {
                    (Some(waiter), result) => {
                        let _ = waiter.send(result);
                    }
                    (None, Err(e)) => warn!("Broker rejected request {request_id}: {e}"),
                    (None, Ok(_)) => debug!("Unmatched reply {request_id}"),
                }
            }
            ServerMessage::Deliver { delivery } => {
                let sink = self
                    .consumers
                    .lock()
                    .ok()
                    .and_then(|consumers| {
                        consumers
                            .get(&delivery.consumer_tag)
                            .map(|(_, sink)| sink.clone())
                    });
                match sink {
                    Some(sink) => {
                        let _ = sink.send(delivery);
                    }
                    None => warn!(
                        "Delivery {} for unknown consumer {}",
                        delivery.delivery_tag, delivery.consumer_tag
                    ),
                }
            }
        }
    }

    /// Fail every waiting call and end every consumer stream.
    fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.clear();
        }
    }
}

/// A connection to the network broker over WebSocket.
#[derive(Debug, Clone)]
pub struct RemoteConnection {
    inner: Arc<Inner>,
}

impl RemoteConnection {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| BrokerError::ConnectionClosed(format!("cannot reach {url}: {e}")))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        let shared = Arc::new(Shared::default());

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send frame to broker: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = ws_receiver.next().await {
                    if msg.is_close() {
                        break;
                    }
                    let Ok(text) = msg.to_text() else {
                        continue;
                    };
                    match serde_json::from_str::<ServerMessage>(text) {
                        Ok(message) => shared.dispatch(message),
                        Err(e) => warn!("Invalid broker frame: {e} | {text}"),
                    }
                }
                shared.shut_down();
                info!("Connection to broker closed");
            });
        }

        info!("Connected to broker at {url}");
        Ok(Self {
            inner: Arc::new(Inner {
                outbound: tx,
                shared,
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for RemoteConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, BrokerError> {
        match self.inner.call(ClientMessage::OpenChannel).await? {
            Reply::ChannelOpened { channel } => Ok(Arc::new(RemoteChannel {
                id: channel,
                inner: self.inner.clone(),
            })),
            other => Err(unexpected(other)),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let _ = self.inner.outbound.send(WsMessage::Close(None));
        self.inner.shared.shut_down();
        Ok(())
    }
}

fn unexpected(reply: Reply) -> BrokerError {
    BrokerError::Transport(format!("unexpected reply {reply:?}"))
}

#[derive(Debug)]
pub struct RemoteChannel {
    id: ChannelId,
    inner: Arc<Inner>,
}

impl RemoteChannel {
    async fn call_done(&self, request: ClientMessage) -> Result<(), BrokerError> {
        match self.inner.call(request).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl Channel for RemoteChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.call_done(ClientMessage::DeclareExchange {
            channel: self.id,
            exchange: exchange.to_string(),
            kind,
            durable,
        })
        .await
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        let request = ClientMessage::DeclareQueue {
            channel: self.id,
            queue: queue.to_string(),
            options,
        };
        match self.inner.call(request).await? {
            Reply::QueueDeclared { info } => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.call_done(ClientMessage::BindQueue {
            channel: self.id,
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })
        .await
    }

    async fn queue_delete(&self, queue: &str) -> Result<(), BrokerError> {
        self.call_done(ClientMessage::DeleteQueue {
            channel: self.id,
            queue: queue.to_string(),
        })
        .await
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.call_done(ClientMessage::Qos {
            channel: self.id,
            prefetch_count,
        })
        .await
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        publishing: Publishing,
    ) -> Result<(), BrokerError> {
        self.inner.cast(ClientMessage::Publish {
            channel: self.id,
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            publishing,
        })
    }

    async fn basic_consume(&self, queue: &str) -> Result<Consumer, BrokerError> {
        // The sink is registered before asking, so deliveries racing the
        // reply still find it.
        let tag = format!("ctag-{}", uuid::Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut consumers) = self.inner.shared.consumers.lock() {
            consumers.insert(tag.clone(), (self.id, tx));
        }

        let request = ClientMessage::Consume {
            channel: self.id,
            queue: queue.to_string(),
            consumer_tag: tag.clone(),
        };
        match self.inner.call(request).await {
            Ok(Reply::ConsumeOk { consumer_tag }) => Ok(Consumer {
                tag: consumer_tag,
                deliveries: rx,
            }),
            result => {
                if let Ok(mut consumers) = self.inner.shared.consumers.lock() {
                    consumers.remove(&tag);
                }
                Err(match result {
                    Err(e) => e,
                    Ok(other) => unexpected(other),
                })
            }
        }
    }

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError> {
        self.inner.cast(ClientMessage::Ack {
            channel: self.id,
            delivery_tag,
        })
    }

    async fn basic_nack(
        &self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        self.inner.cast(ClientMessage::Nack {
            channel: self.id,
            delivery_tag,
            requeue,
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if let Ok(mut consumers) = self.inner.shared.consumers.lock() {
            consumers.retain(|_, (channel, _)| *channel != self.id);
        }
        self.call_done(ClientMessage::CloseChannel { channel: self.id })
            .await
    }
}
