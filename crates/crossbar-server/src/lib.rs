//! # crossbar-server
//!
//! Two-group `WebSocket` relay with a UDP side channel to an external worker.
//!
//! - Listener groups A and B: every plain message from one group is fanned
//!   out to all live members of the other
//! - Messages marked for the worker are sent over UDP instead of relayed
//! - Worker responses arrive asynchronously and go to both groups
//! - A periodic reaper removes connections that died without a clean close
//! - Graceful shutdown via `CancellationToken`
//!
//! | Module | Role |
//! |--------|------|
//! | [`relay::registry`] | Group membership |
//! | [`relay::fanout`] | Non-blocking broadcast to a group |
//! | [`relay::classify`] | Relay vs. bridge routing |
//! | [`relay::reaper`] | Stale connection sweep |
//! | [`bridge`] | Outbound dispatcher and inbound listener |
//! | [`websocket::session`] | Per-connection lifecycle |
//! | [`server`] | Binding, routing and task ownership |

#![deny(unsafe_code)]

pub mod bridge;
pub mod context;
pub mod error;
pub mod health;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use error::{RelayError, Result};
pub use relay::classify::{MessageClassifier, RelayMessage};
pub use relay::registry::ConnectionRegistry;
pub use server::{RelayHandle, RelayServer};
pub use websocket::connection::{Frame, Group};
