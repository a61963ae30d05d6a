//! Socket.IO over WebSocket transport built on `tokio-tungstenite`.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::error::ChannelError;

use super::{
    protocol::Packet,
    transport::{AckSender, InboundEvent, InboundSink, Transport},
};

type PendingAcks = Arc<StdMutex<HashMap<u64, AckSender>>>;

/// Live connection state
struct Connection {
    outbound: mpsc::UnboundedSender<String>,
    acks: PendingAcks,
    inbound: InboundSink,
    disconnect_sent: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Socket.IO client transport over a single WebSocket.
pub struct WebSocketTransport {
    url: String,
    connect_timeout: Duration,
    connection: Mutex<Option<Connection>>,
    next_ack_id: AtomicU64,
}

impl WebSocketTransport {
    /// `url` is the full Socket.IO endpoint, e.g.
    /// `wss://host/socket.io/?EIO=4&transport=websocket`.
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            connection: Mutex::new(None),
            next_ack_id: AtomicU64::new(0),
        }
    }

    /// Ack ids of the live connection still tracked for a server reply.
    pub async fn pending_acks(&self) -> usize {
        let connection = self.connection.lock().await;
        connection
            .as_ref()
            .and_then(|connection| connection.acks.lock().ok().map(|acks| acks.len()))
            .unwrap_or(0)
    }
}

/// Send the synthetic `disconnect` event at most once per connection.
fn notify_disconnect(inbound: &InboundSink, disconnect_sent: &AtomicBool) {
    if !disconnect_sent.swap(true, Ordering::SeqCst) {
        inbound.send(InboundEvent::disconnected()).ok();
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, inbound: InboundSink) -> Result<(), ChannelError> {
        let mut connection = self.connection.lock().await;
        if let Some(existing) = connection.as_ref()
            && !existing.reader.is_finished()
        {
            return Ok(());
        }
        if let Some(stale) = connection.take() {
            stale.writer.abort();
        }

        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let (ws_stream, _response) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(timeout_ms))?
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("WebSocket established to {}", self.url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ChannelError>>();
        let acks: PendingAcks = Arc::new(StdMutex::new(HashMap::new()));
        let disconnect_sent = Arc::new(AtomicBool::new(false));

        // Writer: owns the sink, drains queued frames
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                tracing::trace!("-> {}", frame);
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    tracing::warn!("Failed to send frame: {}", e);
                    break;
                }
            }
            write.close().await.ok();
        });

        // Reader: decodes frames, answers pings, routes events and acks
        let reader_outbound = outbound_tx.clone();
        let reader_inbound = inbound.clone();
        let reader_acks = acks.clone();
        let reader_disconnect_sent = disconnect_sent.clone();
        let reader = tokio::spawn(async move {
            let mut ready_tx = Some(ready_tx);

            while let Some(message) = read.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        tracing::info!("Server closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("WebSocket read error: {}", e);
                        break;
                    }
                    _ => continue,
                };
                tracing::trace!("<- {}", text.as_str());

                let packet = match Packet::decode(text.as_str()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        tracing::warn!("Dropping undecodable frame: {}", e);
                        continue;
                    }
                };

                match packet {
                    Packet::Open(open) => {
                        tracing::debug!("Engine handshake complete (sid {})", open.sid);
                        reader_outbound.send(Packet::Connect(None).encode()).ok();
                    }
                    Packet::Ping => {
                        reader_outbound.send(Packet::Pong.encode()).ok();
                    }
                    Packet::Connect(_) => {
                        if let Some(tx) = ready_tx.take() {
                            tx.send(Ok(())).ok();
                        }
                        reader_inbound.send(InboundEvent::connected()).ok();
                    }
                    Packet::ConnectError(data) => {
                        if let Some(tx) = ready_tx.take() {
                            tx.send(Err(ChannelError::Rejected(data.to_string()))).ok();
                        }
                        break;
                    }
                    Packet::Event { name, payload, .. } => {
                        reader_inbound.send(InboundEvent::new(name, payload)).ok();
                    }
                    Packet::Ack { ack_id, args } => {
                        let pending = reader_acks
                            .lock()
                            .ok()
                            .and_then(|mut acks| acks.remove(&ack_id));
                        match pending {
                            Some(tx) => {
                                tx.send(args.into_iter().next().unwrap_or(Value::Null)).ok();
                            }
                            None => tracing::debug!("Ack {} has no pending request", ack_id),
                        }
                    }
                    Packet::Disconnect | Packet::Close => {
                        tracing::info!("Server ended the session");
                        break;
                    }
                    Packet::Pong | Packet::Noop => {}
                }
            }

            if let Some(tx) = ready_tx.take() {
                tx.send(Err(ChannelError::ConnectionFailed(
                    "connection closed during handshake".to_string(),
                )))
                .ok();
            }
            notify_disconnect(&reader_inbound, &reader_disconnect_sent);
        });

        let handshake = match timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::ConnectionFailed(
                "handshake task ended".to_string(),
            )),
            Err(_) => Err(ChannelError::ConnectTimeout(timeout_ms)),
        };
        if let Err(e) = handshake {
            reader.abort();
            writer.abort();
            return Err(e);
        }

        *connection = Some(Connection {
            outbound: outbound_tx,
            acks,
            inbound,
            disconnect_sent,
            reader,
            writer,
        });
        Ok(())
    }

    async fn close(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };

        let Connection {
            outbound,
            inbound,
            disconnect_sent,
            reader,
            writer,
            ..
        } = connection;

        outbound.send(Packet::Disconnect.encode()).ok();
        // The reader holds a sender clone; wait until its task is gone
        reader.abort();
        reader.await.ok();
        notify_disconnect(&inbound, &disconnect_sent);

        // Dropping the last sender lets the writer flush and close the socket
        drop(outbound);
        if timeout(Duration::from_secs(1), writer).await.is_err() {
            tracing::debug!("Writer did not finish in time");
        }
    }

    async fn send(
        &self,
        event: &str,
        payload: Value,
        ack: Option<AckSender>,
    ) -> Result<(), ChannelError> {
        let connection = self.connection.lock().await;
        let connection = connection.as_ref().ok_or(ChannelError::NotConnected)?;

        let ack_id = match ack {
            Some(tx) => {
                let id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut acks) = connection.acks.lock() {
                    // Requesters that stopped waiting never get their reply
                    acks.retain(|_, pending| !pending.is_closed());
                    acks.insert(id, tx);
                }
                Some(id)
            }
            None => None,
        };

        connection
            .outbound
            .send(Packet::event(event, payload, ack_id).encode())
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }
}
