//! Broadcast of one frame to every live member of a group.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::metrics::{
    RELAY_FANOUT_DROPS_TOTAL, RELAY_FRAMES_DELIVERED_TOTAL, RELAY_SLOW_CONSUMERS_TOTAL,
};
use crate::websocket::connection::{Frame, Group, SendError};

/// Default number of dropped frames after which a slow consumer is closed.
pub const DEFAULT_MAX_SEND_DROPS: u64 = 100;

/// Delivery counts from [`BroadcastFanout::send_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Frames enqueued to group A.
    pub group_a: usize,
    /// Frames enqueued to group B.
    pub group_b: usize,
}

impl FanoutReport {
    /// Deliveries across both groups.
    pub fn total(&self) -> usize {
        self.group_a + self.group_b
    }
}

/// Sends frames to group members without waiting on any of them.
pub struct BroadcastFanout {
    registry: Arc<ConnectionRegistry>,
    max_send_drops: u64,
}

impl BroadcastFanout {
    /// Fan-out over `registry`, closing members after `max_send_drops` drops.
    pub fn new(registry: Arc<ConnectionRegistry>, max_send_drops: u64) -> Self {
        Self {
            registry,
            max_send_drops: max_send_drops.max(1),
        }
    }

    /// The registry this fan-out reads from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Enqueue `frame` to every live member of `group`.
    ///
    /// Each member is tried independently; a full or closed member is
    /// logged and skipped. Returns the number of members the frame was
    /// enqueued to, which is 0 for an empty group.
    pub fn send(&self, group: Group, frame: &Frame) -> usize {
        let members = self.registry.snapshot(group);
        let mut recipients = 0usize;
        let mut delivered = 0usize;

        for conn in members.iter().filter(|c| c.is_live()) {
            recipients += 1;
            match conn.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(SendError::Full) => {
                    counter!(RELAY_FANOUT_DROPS_TOTAL, "group" => group.as_str()).increment(1);
                    let drops = conn.drop_count();
                    if drops >= self.max_send_drops {
                        warn!(conn_id = %conn.id(), %group, drops, "disconnecting slow consumer");
                        counter!(RELAY_SLOW_CONSUMERS_TOTAL, "group" => group.as_str())
                            .increment(1);
                        conn.close();
                    } else {
                        warn!(conn_id = %conn.id(), %group, total_drops = drops, "send queue full, frame dropped");
                    }
                }
                Err(SendError::Closed) => {
                    debug!(conn_id = %conn.id(), %group, "send to closed connection, leaving it for the reaper");
                    conn.close();
                }
            }
        }

        if recipients == 0 {
            debug!(%group, "no live members, nothing sent");
        } else {
            counter!(RELAY_FRAMES_DELIVERED_TOTAL, "group" => group.as_str())
                .increment(delivered as u64);
            debug!(%group, recipients, delivered, bytes = frame.len(), "fan-out");
        }
        delivered
    }

    /// Enqueue `frame` to every live member of both groups.
    pub fn send_all(&self, frame: &Frame) -> FanoutReport {
        FanoutReport {
            group_a: self.send(Group::A, frame),
            group_b: self.send(Group::B, frame),
        }
    }
}
