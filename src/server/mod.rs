//! WebSocket relay server

pub mod config;
pub mod listener;

pub use config::RelayConfig;
pub use listener::{RelayServer, SOURCE_PARAM};
