//! Real-time channel to the backend.
//!
//! ## Layers
//!
//! - `protocol`: Socket.IO v4 text frame codec
//! - `transport`: `Transport` trait and inbound event type
//! - `websocket`: `Transport` over `tokio-tungstenite`
//! - `manager`: `ConnectionManager` with scoped subscriptions and leases
//! - `events`: event names and typed outbound payloads

pub mod events;
pub mod manager;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use events::OutboundEvent;
pub use manager::{ChannelLease, ConnectionManager, Subscription};
pub use transport::{InboundEvent, Transport};
pub use websocket::WebSocketTransport;
