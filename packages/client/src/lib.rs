//! MapsApp real-time location sharing and proximity notification client.
//!
//! Position fixes flow from a `LocationProvider` through the throttled uplink
//! into the shared real-time channel; server pushes flow back through the
//! proximity reconciler (map markers) and the notification mediator (modal
//! flow). `screen::MapScreen` wires one visit of the map screen.

// pipeline
pub mod channel;
pub mod context;
pub mod location;
pub mod map;
pub mod notification;
pub mod postings;
pub mod screen;
pub mod uplink;

// backend and persistence
pub mod api;
pub mod session;

// shared
pub mod config;
pub mod domain;
pub mod error;
pub mod notifier;

// terminal client
pub mod formatter;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;
