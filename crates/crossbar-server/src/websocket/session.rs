//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, ConnectionState, Frame, Group};
use crate::context::RelayContext;
use crate::metrics::{
    RELAY_CONNECTIONS_ACTIVE, RELAY_CONNECTIONS_TOTAL, RELAY_DISCONNECTIONS_TOTAL,
};
use crate::relay::classify::RelayMessage;
use crate::relay::registry::ConnectionRegistry;

/// How long the reader waits for the writer to flush its Close frame.
const WRITER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a relay session for an upgraded socket.
///
/// 1. Registers the connection in its group
/// 2. Spawns the writer (queued frames out, periodic Ping)
/// 3. Classifies each inbound frame: relay to the opposite group or bridge
///    to the worker, strictly in arrival order
/// 4. Deregisters on every exit path
#[instrument(skip_all, fields(group = %group, remote = %remote))]
pub async fn run_session(
    socket: WebSocket,
    group: Group,
    remote: SocketAddr,
    ctx: Arc<RelayContext>,
) {
    let (tx, rx) = mpsc::channel(ctx.session.send_queue_capacity);
    let conn = Arc::new(Connection::new(
        group,
        remote,
        tx,
        ctx.session.heartbeat_timeout,
        ctx.shutdown.child_token(),
    ));
    let registration = Registration::enter(&ctx.registry, Arc::clone(&conn));

    let (ws_tx, mut ws_rx) = socket.split();
    let writer = tokio::spawn(write_loop(
        ws_tx,
        rx,
        Arc::clone(&conn),
        ctx.session.heartbeat_interval,
    ));

    loop {
        tokio::select! {
            () = conn.closed() => {
                debug!(conn_id = %conn.id(), "connection closed locally");
                break;
            }
            next = ws_rx.next() => {
                let frame = match next {
                    Some(Ok(Message::Text(text))) => Frame::Text(text),
                    Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        conn.touch();
                        continue;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(conn_id = %conn.id(), "client sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(conn_id = %conn.id(), error = %e, "read failed");
                        break;
                    }
                    None => break,
                };
                conn.touch();
                route(&ctx, &conn, frame).await;
            }
        }
    }

    conn.close();
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_STOP_TIMEOUT, writer).await.is_err() {
        debug!(conn_id = %conn.id(), "writer did not stop in time, aborting");
        abort.abort();
    }
    drop(registration);
}

/// Send one inbound frame where the classifier says it belongs.
pub(crate) async fn route(ctx: &RelayContext, conn: &Connection, frame: Frame) {
    match ctx.classifier.classify(frame) {
        RelayMessage::Plain(frame) => {
            let target = conn.group().opposite();
            let delivered = ctx.fanout.send(target, &frame);
            if delivered == 0 {
                debug!(conn_id = %conn.id(), %target, "no listeners in opposite group");
            }
        }
        RelayMessage::BridgeRequest(payload) => {
            let _ = ctx.dispatcher.dispatch(&payload).await;
        }
        RelayMessage::BridgeResponse(_) => {
            warn!(conn_id = %conn.id(), "client frame classified as bridge response, dropping");
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    conn: Arc<Connection>,
    ping_every: Duration,
) {
    let mut ping = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = conn.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink.send(frame.into_message()).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    conn.close();
}

/// Registry membership tied to a scope.
///
/// Dropping the guard marks the connection closed and removes it from its
/// group, so every exit from [`run_session`] (including a panic) cleans up.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    conn: Arc<Connection>,
}

impl Registration {
    fn enter(registry: &Arc<ConnectionRegistry>, conn: Arc<Connection>) -> Self {
        // Open before add so the reaper never sees a registered `Connecting` entry.
        let _ = conn.advance(ConnectionState::Open);
        let _ = registry.add(Arc::clone(&conn));
        let group = conn.group();
        info!(conn_id = %conn.id(), %group, remote = %conn.remote(), "client connected");
        counter!(RELAY_CONNECTIONS_TOTAL, "group" => group.as_str()).increment(1);
        gauge!(RELAY_CONNECTIONS_ACTIVE, "group" => group.as_str()).increment(1.0);
        Self {
            registry: Arc::clone(registry),
            conn,
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let conn = &self.conn;
        let group = conn.group();
        let _ = conn.advance(ConnectionState::Closed);
        let was_member = self.registry.remove(group, conn.id());
        info!(
            conn_id = %conn.id(),
            %group,
            remote = %conn.remote(),
            age_secs = conn.age().as_secs(),
            was_member,
            "client disconnected"
        );
        counter!(RELAY_DISCONNECTIONS_TOTAL, "group" => group.as_str()).increment(1);
        gauge!(RELAY_CONNECTIONS_ACTIVE, "group" => group.as_str()).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;
    use tokio::net::UdpSocket;

    use super::*;
    use crate::bridge::BridgeDispatcher;
    use crate::context::SessionConfig;
    use crate::relay::classify::MessageClassifier;
    use crate::relay::fanout::BroadcastFanout;
    use crate::shutdown::ShutdownCoordinator;
    use crate::websocket::connection::tests::make_open;

    async fn make_ctx(worker: &UdpSocket) -> Arc<RelayContext> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = BridgeDispatcher::bind(worker.local_addr().unwrap(), Duration::from_secs(1))
            .await
            .unwrap();
        Arc::new(RelayContext {
            fanout: Arc::new(BroadcastFanout::new(Arc::clone(&registry), 100)),
            registry,
            classifier: MessageClassifier::new("bridge-marker"),
            dispatcher: Arc::new(dispatcher),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            session: SessionConfig::default(),
        })
    }

    #[tokio::test]
    async fn plain_frame_goes_to_opposite_group_only() {
        let worker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = make_ctx(&worker).await;
        let (sender, mut sender_rx) = make_open(Group::A, 4);
        let (peer_a, mut peer_a_rx) = make_open(Group::A, 4);
        let (peer_b, mut peer_b_rx) = make_open(Group::B, 4);
        let sender = Arc::new(sender);
        let _ = ctx.registry.add(Arc::clone(&sender));
        let _ = ctx.registry.add(Arc::new(peer_a));
        let _ = ctx.registry.add(Arc::new(peer_b));

        route(&ctx, &sender, Frame::text("hello")).await;

        assert_eq!(peer_b_rx.recv().await.unwrap(), Frame::text("hello"));
        assert!(peer_a_rx.try_recv().is_err());
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_request_goes_to_worker_not_peers() {
        let worker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = make_ctx(&worker).await;
        let (sender, _sender_rx) = make_open(Group::A, 4);
        let (peer_b, mut peer_b_rx) = make_open(Group::B, 4);
        let sender = Arc::new(sender);
        let _ = ctx.registry.add(Arc::clone(&sender));
        let _ = ctx.registry.add(Arc::new(peer_b));

        let raw = r#"{"type":"bridge-marker","data":{"text":"hi"}}"#;
        route(&ctx, &sender, Frame::text(raw)).await;

        let mut buf = [0u8; 1024];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), worker.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let sent: Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(sent, serde_json::json!({"text": "hi"}));
        assert!(peer_b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_request_without_data_is_consumed() {
        let worker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = make_ctx(&worker).await;
        let (sender, _sender_rx) = make_open(Group::B, 4);
        let (peer_a, mut peer_a_rx) = make_open(Group::A, 4);
        let sender = Arc::new(sender);
        let _ = ctx.registry.add(Arc::new(peer_a));

        route(&ctx, &sender, Frame::text(r#"{"type":"bridge-marker"}"#)).await;

        assert!(peer_a_rx.try_recv().is_err());
        let mut buf = [0u8; 64];
        let got = tokio::time::timeout(Duration::from_millis(100), worker.recv_from(&mut buf)).await;
        assert!(got.is_err());
    }

    #[test]
    fn registration_adds_and_drop_removes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(Connection::new(
            Group::B,
            "127.0.0.1:5000".parse().unwrap(),
            tx,
            Duration::from_secs(90),
            tokio_util::sync::CancellationToken::new(),
        ));
        let id = conn.id().clone();

        let guard = Registration::enter(&registry, Arc::clone(&conn));
        assert!(registry.contains(Group::B, &id));
        assert!(conn.is_live());

        drop(guard);
        assert!(!registry.contains(Group::B, &id));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn registration_drop_after_reaper_removal_is_harmless() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = make_open(Group::A, 4);
        let conn = Arc::new(conn);
        let guard = Registration::enter(&registry, Arc::clone(&conn));
        assert!(registry.remove(Group::A, conn.id()));
        drop(guard);
        assert!(registry.is_empty(Group::A));
    }
}
