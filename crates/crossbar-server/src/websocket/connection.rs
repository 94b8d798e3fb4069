//! A single relay connection as seen by the rest of the server.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Which listener a connection arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Group {
    /// First listener.
    A,
    /// Second listener.
    B,
}

impl Group {
    /// Both groups, in a fixed order.
    pub const ALL: [Group; 2] = [Group::A, Group::B];

    /// The group that receives this group's plain messages.
    pub fn opposite(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Lowercase label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique connection identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// A fresh time-ordered id.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, not yet registered.
    Connecting = 0,
    /// Registered and relaying.
    Open = 1,
    /// Shutting down; no longer a fan-out target.
    Closing = 2,
    /// Gone.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// An outbound payload, shared by every recipient of a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text.
    Text(Utf8Bytes),
    /// Opaque bytes.
    Binary(Bytes),
}

impl Frame {
    /// Text frame from anything string-like.
    pub fn text(s: impl Into<Utf8Bytes>) -> Self {
        Self::Text(s.into())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.as_str().len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert to a WebSocket message for the writer task.
    pub fn into_message(self) -> Message {
        match self {
            Self::Text(t) => Message::Text(t),
            Self::Binary(b) => Message::Binary(b),
        }
    }
}

/// Why an enqueue failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer is behind; the frame was dropped.
    #[error("send queue full")]
    Full,
    /// The writer task has exited.
    #[error("connection closed")]
    Closed,
}

/// A live duplex WebSocket connection.
///
/// Frames are handed to the connection's writer task through a bounded
/// queue, so senders never touch the socket and never wait.
pub struct Connection {
    id: ConnectionId,
    group: Group,
    remote: SocketAddr,
    tx: mpsc::Sender<Frame>,
    state: AtomicU8,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    heartbeat_timeout: Duration,
    dropped: AtomicU64,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection in the `Connecting` state.
    ///
    /// `cancel` stops the connection's tasks; pass a child of the server
    /// shutdown token so shutdown reaches every connection.
    pub fn new(
        group: Group,
        remote: SocketAddr,
        tx: mpsc::Sender<Frame>,
        heartbeat_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            group,
            remote,
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            connected_at: now,
            last_seen: Mutex::new(now),
            heartbeat_timeout,
            dropped: AtomicU64::new(0),
            cancel,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Group fixed at accept time.
    pub fn group(&self) -> Group {
        self.group
    }

    /// Peer address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless the connection is already further along.
    ///
    /// Returns the previous state.
    pub fn advance(&self, to: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.state.fetch_max(to as u8, Ordering::AcqRel))
    }

    /// Start closing: stop being a fan-out target and wake the connection's
    /// tasks so they can send a Close frame and exit.
    pub fn close(&self) {
        let _ = self.advance(ConnectionState::Closing);
        self.cancel.cancel();
    }

    /// Resolves once [`Self::close`] was called or the server is shutting down.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Whether the connection should still receive fan-out.
    ///
    /// True iff the connection is `Open`, its writer is running, and the
    /// peer was heard from within the heartbeat timeout. Never fails on a
    /// closed peer.
    pub fn is_live(&self) -> bool {
        self.state() == ConnectionState::Open
            && !self.cancel.is_cancelled()
            && !self.tx.is_closed()
            && self.last_seen.lock().elapsed() < self.heartbeat_timeout
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Enqueue a frame for the writer task without waiting.
    pub fn send(&self, frame: Frame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                SendError::Full
            }
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Frames dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
