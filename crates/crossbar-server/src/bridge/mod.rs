//! UDP side channel to the external worker.
//!
//! Requests leave through [`outbound::BridgeDispatcher`] as single
//! fire-and-forget datagrams. Responses arrive at any later time on the
//! [`inbound::BridgeListener`] socket and are broadcast to both groups.
//! Nothing correlates a response with its request.

pub mod inbound;
pub mod outbound;

pub use inbound::BridgeListener;
pub use outbound::{BridgeDispatcher, DispatchError};
