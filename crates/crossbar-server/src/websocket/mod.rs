//! Per-connection state and the WebSocket session lifecycle.

pub mod connection;
pub mod session;
