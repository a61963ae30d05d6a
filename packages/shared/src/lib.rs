//! Utilities shared by the MapsApp client library and binary.

pub mod logger;
pub mod time;
