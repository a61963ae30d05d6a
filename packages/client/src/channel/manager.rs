//! Connection Manager: the single shared real-time channel of a session.
//!
//! One `ConnectionManager` is created at startup and handed out as
//! `Arc<ConnectionManager>`. Screens hold it through a `ChannelLease` and
//! listen through `Subscription`s; both unregister themselves on drop.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex as StdMutex, Weak,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde_json::Value;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::timeout,
};

use crate::error::ChannelError;

use super::{
    events::{DISCONNECT, OutboundEvent},
    transport::{InboundEvent, Transport},
};

/// How long `send` waits for an acknowledgment before giving up on it
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(15);

type Handlers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Value>)>>;

/// Event-name → subscriber table
#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: StdMutex<Handlers>,
}

impl Registry {
    fn register(&self, event: &str) -> (u64, mpsc::UnboundedReceiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.entry(event.to_string()).or_default().push((id, tx));
        }
        (id, rx)
    }

    fn unregister(&self, event: &str, id: u64) {
        if let Ok(mut handlers) = self.handlers.lock()
            && let Some(subscribers) = handlers.get_mut(event)
        {
            subscribers.retain(|(subscriber_id, _)| *subscriber_id != id);
            if subscribers.is_empty() {
                handlers.remove(event);
            }
        }
    }

    fn dispatch(&self, event: InboundEvent) {
        let Ok(mut handlers) = self.handlers.lock() else {
            return;
        };
        match handlers.get_mut(&event.name) {
            Some(subscribers) => {
                subscribers.retain(|(_, tx)| tx.send(event.payload.clone()).is_ok());
                tracing::debug!(
                    "Dispatched '{}' to {} subscriber(s)",
                    event.name,
                    subscribers.len()
                );
            }
            None => tracing::debug!("No subscriber for '{}'", event.name),
        }
    }

    fn count(&self, event: &str) -> usize {
        self.handlers
            .lock()
            .map(|handlers| handlers.get(event).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// Scoped event subscription; dropping it removes exactly this handler.
pub struct Subscription {
    event: String,
    id: u64,
    registry: Weak<Registry>,
    receiver: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Next payload for this event, in transport order.
    ///
    /// Returns `None` once the manager is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.event, self.id);
            tracing::debug!("Unsubscribed from '{}'", self.event);
        }
    }
}

/// Holding a lease keeps the channel connected.
///
/// Prefer `release().await`; dropping an unreleased lease schedules the
/// disconnect on the current runtime.
pub struct ChannelLease {
    manager: Arc<ConnectionManager>,
    released: bool,
}

impl ChannelLease {
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Give up the lease, disconnecting if no other holder remains.
    pub async fn release(mut self) {
        self.released = true;
        if self.manager.leases.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.manager.disconnect_if_unheld().await;
        }
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.manager.leases.fetch_sub(1, Ordering::SeqCst) == 1
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let manager = self.manager.clone();
            handle.spawn(async move { manager.disconnect_if_unheld().await });
        }
    }
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    /// Serialises connect/disconnect so at most one attempt is in flight
    lifecycle: Mutex<()>,
    connected: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    leases: AtomicUsize,
    ack_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            registry: Arc::new(Registry::default()),
            lifecycle: Mutex::new(()),
            connected: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            leases: AtomicUsize::new(0),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Override how long `send` waits for acknowledgments.
    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect the channel. Idempotent.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<InboundEvent>();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.transport.open(inbound_tx).await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Channel connected");

        let registry = self.registry.clone();
        let connected = self.connected.clone();
        let current_epoch = self.epoch.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                if event.name == DISCONNECT && current_epoch.load(Ordering::SeqCst) == epoch {
                    connected.store(false, Ordering::SeqCst);
                    tracing::info!("Channel disconnected");
                }
                registry.dispatch(event);
            }
            if current_epoch.load(Ordering::SeqCst) == epoch {
                connected.store(false, Ordering::SeqCst);
            }
        });

        Ok(())
    }

    /// Disconnect the channel. No-op unless currently connected.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.transport.close().await;
    }

    async fn disconnect_if_unheld(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.leases.load(Ordering::SeqCst) > 0 {
            return;
        }
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Last lease released, closing channel");
            self.transport.close().await;
        }
    }

    /// Take a lease on the channel, connecting it if needed.
    pub async fn acquire(self: &Arc<Self>) -> Result<ChannelLease, ChannelError> {
        self.leases.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.connect().await {
            self.leases.fetch_sub(1, Ordering::SeqCst);
            return Err(e);
        }
        Ok(ChannelLease {
            manager: self.clone(),
            released: false,
        })
    }

    pub fn lease_count(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    /// Listen for `event` until the returned handle is dropped.
    pub fn subscribe(&self, event: &str) -> Subscription {
        let (id, receiver) = self.registry.register(event);
        tracing::debug!("Subscribed to '{}'", event);
        Subscription {
            event: event.to_string(),
            id,
            registry: Arc::downgrade(&self.registry),
            receiver,
        }
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.count(event)
    }

    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        tracing::debug!("Emitting '{}': {}", event, payload);
        self.transport.send(event, payload, None).await
    }

    /// Emit and obtain a receiver for the server acknowledgment.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        payload: Value,
    ) -> Result<oneshot::Receiver<Value>, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        tracing::debug!("Emitting '{}' with ack: {}", event, payload);
        self.transport.send(event, payload, Some(ack_tx)).await?;
        Ok(ack_rx)
    }

    /// Emit a typed outbound event. Events answered by the backend spawn a
    /// task that logs the acknowledgment, or gives up on it after the ack
    /// timeout.
    pub async fn send(&self, event: &OutboundEvent) -> Result<(), ChannelError> {
        if !event.expects_ack() {
            return self.emit(event.name(), event.payload()).await;
        }

        let ack = self.emit_with_ack(event.name(), event.payload()).await?;
        let name = event.name();
        let ack_timeout = self.ack_timeout;
        tokio::spawn(async move {
            // Dropping the receiver on expiry lets the transport forget the ack id
            match timeout(ack_timeout, ack).await {
                Ok(Ok(reply)) => tracing::debug!("Ack for '{}': {}", name, reply),
                Ok(Err(_)) => tracing::debug!("'{}' was never acknowledged", name),
                Err(_) => tracing::debug!(
                    "No ack for '{}' within {} ms",
                    name,
                    ack_timeout.as_millis()
                ),
            }
        });
        Ok(())
    }
}
