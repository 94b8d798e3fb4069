//! Group membership, fan-out, message routing and the stale connection sweep.

pub mod classify;
pub mod fanout;
pub mod reaper;
pub mod registry;
