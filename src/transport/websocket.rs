//! WebSocket transport
//!
//! This file implements the network broker: a WebSocket server that
//! translates protocol frames into broker operations. Responsibilities:
//! - Accept TCP/WebSocket connections, up to `broker.max_connections`
//! - Open one broker connection per socket and close it when the socket goes
//! - Check that every channel a frame names belongs to that socket
//! - Forward each consumer's deliveries back down the socket
//!
//! The broker lock is only held while a single frame is applied, never across
//! socket I/O.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::{Broker, ChannelId, ConnectionId, Delivery};
use crate::config::Settings;
use crate::transport::message::{ClientFrame, ClientMessage, Reply, ServerMessage};
use crate::utils::error::BrokerError;

pub async fn start_websocket_server(
    addr: String,
    broker: Arc<Mutex<Broker>>,
    settings: Settings,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Broker listening on ws://{addr}");
    serve(listener, broker, settings).await
}

/// Accept connections on an already bound listener until accepting fails.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Mutex<Broker>>,
    settings: Settings,
) -> std::io::Result<()> {
    let active = Arc::new(AtomicUsize::new(0));
    let max_connections = settings.broker.max_connections;

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted TCP connection from {addr}");
        let broker = broker.clone();
        let active = active.clone();
        spawn(async move {
            handle_socket(stream, broker, active, max_connections).await;
        });
    }
}

async fn handle_socket(
    stream: TcpStream,
    broker: Arc<Mutex<Broker>>,
    active: Arc<AtomicUsize>,
    max_connections: usize,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    if active.fetch_add(1, Ordering::SeqCst) >= max_connections {
        active.fetch_sub(1, Ordering::SeqCst);
        warn!("Rejecting connection: limit of {max_connections} reached");
        let refusal = ServerMessage::Reply {
            request_id: 0,
            result: Err(BrokerError::ConnectionLimit(max_connections)),
        };
        if let Ok(json) = serde_json::to_string(&refusal) {
            let _ = ws_sender.send(WsMessage::text(json)).await;
        }
        let _ = ws_sender.close().await;
        return;
    }

    let connection = match lock(&broker) {
        Ok(mut b) => b.open_connection(),
        Err(e) => {
            error!("Cannot open broker connection: {e}");
            active.fetch_sub(1, Ordering::SeqCst);
            return;
        }
    };
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let peer = Peer {
        id: format!("client-{}", uuid::Uuid::new_v4()),
        connection,
        sender: tx,
    };
    info!("{} connected as broker connection {connection}", peer.id);

    {
        let peer_id = peer.id.clone();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    warn!("Failed to send frame to {peer_id}: {e}");
                    break;
                }
            }
            debug!("Send loop closed for {peer_id}");
        });
    }

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if msg.is_close() {
            break;
        }
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => peer.handle(&broker, frame),
            Err(err) => warn!("Invalid client frame from {}: {err} | {text}", peer.id),
        }
    }

    if let Ok(mut b) = lock(&broker) {
        b.close_connection(connection);
    }
    active.fetch_sub(1, Ordering::SeqCst);
    info!("{} disconnected", peer.id);
}

fn lock(broker: &Mutex<Broker>) -> Result<MutexGuard<'_, Broker>, BrokerError> {
    broker
        .lock()
        .map_err(|_| BrokerError::ConnectionClosed("broker lock poisoned".to_string()))
}

/// Server-side state of one connected socket.
#[derive(Debug)]
struct Peer {
    id: String,
    connection: ConnectionId,
    sender: mpsc::UnboundedSender<WsMessage>,
}

impl Peer {
    fn handle(&self, broker: &Mutex<Broker>, frame: ClientFrame) {
        let expects_reply = frame.request.expects_reply();
        let result = self.execute(broker, frame.request);
        if let Err(e) = &result {
            debug!("Request {} from {} failed: {e}", frame.request_id, self.id);
        }
        if expects_reply || result.is_err() {
            self.send(&ServerMessage::Reply {
                request_id: frame.request_id,
                result,
            });
        }
    }

    fn send(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(json) => {
                let _ = self.sender.send(WsMessage::text(json));
            }
            Err(e) => error!("Failed to serialize frame for {}: {e}", self.id),
        }
    }

    fn owns(&self, broker: &Broker, channel: ChannelId) -> Result<(), BrokerError> {
        if broker.channel_connection(channel)? == self.connection {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed(channel))
        }
    }

    fn execute(&self, broker: &Mutex<Broker>, request: ClientMessage) -> Result<Reply, BrokerError> {
        let mut broker = lock(broker)?;
        match request {
            ClientMessage::OpenChannel => Ok(Reply::ChannelOpened {
                channel: broker.open_channel(self.connection)?,
            }),
            ClientMessage::CloseChannel { channel } => {
                self.owns(&broker, channel)?;
                broker.close_channel(channel);
                Ok(Reply::Done)
            }
            ClientMessage::DeclareExchange {
                channel,
                exchange,
                kind,
                durable,
            } => {
                self.owns(&broker, channel)?;
                broker.declare_exchange(&exchange, kind, durable)?;
                Ok(Reply::Done)
            }
            ClientMessage::DeclareQueue {
                channel,
                queue,
                options,
            } => {
                self.owns(&broker, channel)?;
                let info = broker.declare_queue(channel, &queue, options)?;
                Ok(Reply::QueueDeclared { info })
            }
            ClientMessage::BindQueue {
                channel,
                queue,
                exchange,
                routing_key,
            } => {
                self.owns(&broker, channel)?;
                broker.bind_queue(channel, &queue, &exchange, &routing_key)?;
                Ok(Reply::Done)
            }
            ClientMessage::DeleteQueue { channel, queue } => {
                self.owns(&broker, channel)?;
                broker.delete_queue(&queue);
                Ok(Reply::Done)
            }
            ClientMessage::Qos {
                channel,
                prefetch_count,
            } => {
                self.owns(&broker, channel)?;
                broker.set_prefetch(channel, prefetch_count)?;
                Ok(Reply::Done)
            }
            ClientMessage::Consume {
                channel,
                queue,
                consumer_tag,
            } => {
                self.owns(&broker, channel)?;
                let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
                let consumer_tag = broker.consume(channel, &queue, &consumer_tag, tx)?;

                let outbound = self.sender.clone();
                spawn(async move {
                    while let Some(delivery) = rx.recv().await {
                        let Ok(json) = serde_json::to_string(&ServerMessage::Deliver { delivery })
                        else {
                            continue;
                        };
                        if outbound.send(WsMessage::text(json)).is_err() {
                            break;
                        }
                    }
                });
                Ok(Reply::ConsumeOk { consumer_tag })
            }
            ClientMessage::Publish {
                channel,
                exchange,
                routing_key,
                publishing,
            } => {
                self.owns(&broker, channel)?;
                broker.publish(&exchange, &routing_key, publishing)?;
                Ok(Reply::Done)
            }
            ClientMessage::Ack {
                channel,
                delivery_tag,
            } => {
                self.owns(&broker, channel)?;
                broker.ack(channel, delivery_tag)?;
                Ok(Reply::Done)
            }
            ClientMessage::Nack {
                channel,
                delivery_tag,
                requeue,
            } => {
                self.owns(&broker, channel)?;
                broker.nack(channel, delivery_tag, requeue)?;
                Ok(Reply::Done)
            }
        }
    }
}
