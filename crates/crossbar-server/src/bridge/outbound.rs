//! Worker-bound datagrams.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use metrics::counter;
use serde_json::Value;
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{RelayError, Result};
use crate::metrics::BRIDGE_DISPATCH_TOTAL;
use crate::relay::classify::BridgePayload;

/// Why a datagram was not sent.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The payload could not be serialized.
    #[error("failed to encode bridge payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// The send did not complete in time.
    #[error("bridge send timed out after {0:?}")]
    Timeout(Duration),
    /// The socket rejected the send.
    #[error("bridge send failed: {0}")]
    Io(#[from] io::Error),
}

/// Sends bridge payloads to the worker.
///
/// Owns one ephemeral UDP socket for the lifetime of the server. Delivery
/// is best effort: no retries, no acknowledgement.
#[derive(Debug)]
pub struct BridgeDispatcher {
    socket: UdpSocket,
    worker_addr: SocketAddr,
    send_timeout: Duration,
}

impl BridgeDispatcher {
    /// Bind an ephemeral socket of the worker's address family.
    pub async fn bind(worker_addr: SocketAddr, send_timeout: Duration) -> Result<Self> {
        let local: SocketAddr = if worker_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| RelayError::bind("bridge dispatcher", local, e))?;
        Ok(Self {
            socket,
            worker_addr,
            send_timeout,
        })
    }

    /// Where payloads are sent.
    pub fn worker_addr(&self) -> SocketAddr {
        self.worker_addr
    }

    /// Local address of the outbound socket.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Forward a bridge request, logging instead of failing.
    ///
    /// A payload without data is not sent. Returns whether a datagram left.
    pub async fn dispatch(&self, payload: &BridgePayload) -> bool {
        let Some(data) = payload.data.as_ref() else {
            warn!(kind = %payload.kind, "bridge request has no data, ignoring");
            counter!(BRIDGE_DISPATCH_TOTAL, "outcome" => "empty").increment(1);
            return false;
        };

        match self.send(data).await {
            Ok(len) => {
                debug!(worker = %self.worker_addr, len, "bridge request sent");
                counter!(BRIDGE_DISPATCH_TOTAL, "outcome" => "sent").increment(1);
                true
            }
            Err(e) => {
                warn!(worker = %self.worker_addr, error = %e, "bridge request dropped");
                counter!(BRIDGE_DISPATCH_TOTAL, "outcome" => "failed").increment(1);
                false
            }
        }
    }

    /// Serialize `data` and send it as one datagram.
    pub async fn send(&self, data: &Value) -> std::result::Result<usize, DispatchError> {
        let body = serde_json::to_vec(data)?;
        tokio::time::timeout(
            self.send_timeout,
            self.socket.send_to(&body, self.worker_addr),
        )
        .await
        .map_err(|_| DispatchError::Timeout(self.send_timeout))?
        .map_err(DispatchError::from)
    }
}
