//! Transport abstraction underneath the `ConnectionManager`.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::ChannelError;

use super::events::{CONNECT, DISCONNECT};

/// Event received from the backend (or synthesised by the transport)
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub payload: Value,
}

impl InboundEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn connected() -> Self {
        Self::new(CONNECT, Value::Null)
    }

    pub fn disconnected() -> Self {
        Self::new(DISCONNECT, Value::Null)
    }
}

/// Sink for inbound events, handed to the transport on `open`.
///
/// The transport dispatches exactly one `disconnect` event when a connection
/// ends, whether the server dropped it or `close` was called.
pub type InboundSink = mpsc::UnboundedSender<InboundEvent>;

/// Resolves with the first acknowledgment argument.
pub type AckSender = oneshot::Sender<Value>;

/// Bidirectional event transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Returns once the backend accepted it.
    async fn open(&self, inbound: InboundSink) -> Result<(), ChannelError>;

    /// Close the connection. No-op when already closed.
    async fn close(&self);

    /// Send one event, optionally requesting an acknowledgment.
    async fn send(
        &self,
        event: &str,
        payload: Value,
        ack: Option<AckSender>,
    ) -> Result<(), ChannelError>;
}
