//! Worker responses, broadcast to both groups.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use metrics::counter;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::metrics::BRIDGE_RESPONSES_TOTAL;
use crate::relay::classify::{MessageClassifier, RelayMessage};
use crate::relay::fanout::{BroadcastFanout, FanoutReport};

/// Receives worker datagrams on a fixed local address.
pub struct BridgeListener {
    socket: UdpSocket,
    fanout: Arc<BroadcastFanout>,
    classifier: MessageClassifier,
    max_datagram_size: usize,
}

impl BridgeListener {
    /// Bind the receive socket. Failure here is fatal for the server.
    pub async fn bind(
        addr: SocketAddr,
        fanout: Arc<BroadcastFanout>,
        classifier: MessageClassifier,
        max_datagram_size: usize,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| RelayError::bind("bridge listener", addr, e))?;
        Ok(Self {
            socket,
            fanout,
            classifier,
            max_datagram_size: max_datagram_size.max(1),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until `cancel` fires.
    ///
    /// Each datagram is handled on its own; a bad one is dropped and a
    /// receive error is logged, neither stops the loop.
    pub async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; self.max_datagram_size];
        info!(addr = ?self.socket.local_addr().ok(), "bridge listener started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        let _ = self.handle_datagram(&buf[..len], peer);
                    }
                    Err(e) => {
                        warn!(error = %e, "bridge receive failed");
                    }
                },
            }
        }
        info!("bridge listener stopped");
    }

    /// Validate one datagram and broadcast it. Returns `None` if dropped.
    pub fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) -> Option<FanoutReport> {
        match self.classifier.classify_datagram(datagram) {
            Ok(RelayMessage::BridgeResponse(response)) => {
                counter!(BRIDGE_RESPONSES_TOTAL, "outcome" => "broadcast").increment(1);
                let report = self.fanout.send_all(&response.into_frame());
                info!(
                    %peer,
                    len = datagram.len(),
                    group_a = report.group_a,
                    group_b = report.group_b,
                    "worker response broadcast"
                );
                Some(report)
            }
            Ok(other) => {
                debug!(%peer, ?other, "unexpected datagram classification");
                None
            }
            Err(e) => {
                counter!(BRIDGE_RESPONSES_TOTAL, "outcome" => "malformed").increment(1);
                warn!(%peer, len = datagram.len(), error = %e, "dropping malformed worker datagram");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::relay::registry::ConnectionRegistry;
    use crate::websocket::connection::tests::make_open;
    use crate::websocket::connection::{Frame, Group};

    async fn setup() -> (Arc<ConnectionRegistry>, BridgeListener) {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(BroadcastFanout::new(Arc::clone(&registry), 100));
        let listener = BridgeListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            fanout,
            MessageClassifier::default(),
            4096,
        )
        .await
        .unwrap();
        (registry, listener)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    #[tokio::test]
    async fn valid_datagram_reaches_both_groups_verbatim() {
        let (reg, listener) = setup().await;
        let (a, mut rx_a) = make_open(Group::A, 4);
        let (b, mut rx_b) = make_open(Group::B, 4);
        let _ = reg.add(Arc::new(a));
        let _ = reg.add(Arc::new(b));

        let raw = br#"{"original_data": {"text": "hi"}}"#;
        let report = listener.handle_datagram(raw, peer()).unwrap();
        assert_eq!(report.total(), 2);

        let expected = Frame::text(std::str::from_utf8(raw).unwrap().to_owned());
        assert_eq!(rx_a.recv().await.unwrap(), expected);
        assert_eq!(rx_b.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn malformed_datagram_is_dropped() {
        let (reg, listener) = setup().await;
        let (a, mut rx_a) = make_open(Group::A, 4);
        let _ = reg.add(Arc::new(a));

        assert!(listener.handle_datagram(b"{not json", peer()).is_none());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_with_no_listeners_is_noop() {
        let (_reg, listener) = setup().await;
        let report = listener.handle_datagram(b"{}", peer()).unwrap();
        assert_eq!(report.total(), 0);
    }

    #[tokio::test]
    async fn run_loop_survives_bad_datagrams_and_stops_on_cancel() {
        let (reg, listener) = setup().await;
        let addr = listener.local_addr().unwrap();
        let (b, mut rx_b) = make_open(Group::B, 4);
        let _ = reg.add(Arc::new(b));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(cancel.clone()));

        let worker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let _ = worker.send_to(b"garbage", addr).await.unwrap();
        let _ = worker.send_to(br#"{"done":true}"#, addr).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Frame::text(r#"{"done":true}"#));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(BroadcastFanout::new(registry, 100));
        let err = BridgeListener::bind(addr, fanout, MessageClassifier::default(), 4096)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RelayError::Bind { what: "bridge listener", .. }));
    }
}
