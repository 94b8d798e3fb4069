//! `RelayServer`: binds both listeners and the bridge, and owns every
//! long-running task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::rejection::ExtensionRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use crossbar_settings::CrossbarSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bridge::{BridgeDispatcher, BridgeListener};
use crate::context::{RelayContext, SessionConfig};
use crate::error::{RelayError, Result};
use crate::health::{self, HealthResponse};
use crate::relay::classify::MessageClassifier;
use crate::relay::fanout::BroadcastFanout;
use crate::relay::reaper::spawn_reaper;
use crate::relay::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::Group;
use crate::websocket::session::run_session;

/// State shared by the handlers of one listener.
#[derive(Clone)]
pub struct ListenerState {
    /// Group this listener admits connections into.
    pub group: Group,
    /// Shared relay handles.
    pub ctx: Arc<RelayContext>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Largest accepted WebSocket message.
    pub max_message_size: usize,
}

/// The relay server before it is bound.
pub struct RelayServer {
    settings: CrossbarSettings,
    registry: Arc<ConnectionRegistry>,
    fanout: Arc<BroadcastFanout>,
    classifier: MessageClassifier,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server from settings. Nothing is bound yet.
    ///
    /// Settings are validated first, so the liveness window always fits
    /// inside one reaper interval.
    pub fn new(mut settings: CrossbarSettings) -> Self {
        let _ = settings.validate();
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Arc::new(BroadcastFanout::new(
            Arc::clone(&registry),
            settings.server.max_send_drops,
        ));
        let classifier = MessageClassifier::new(settings.bridge.request_marker.clone());
        Self {
            settings,
            registry,
            fanout,
            classifier,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this recorder handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// The settings this server was built from.
    pub fn settings(&self) -> &CrossbarSettings {
        &self.settings
    }

    /// Group membership.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Bind the outbound bridge socket and assemble the connection context.
    pub async fn context(&self) -> Result<Arc<RelayContext>> {
        let bridge = &self.settings.bridge;
        let worker_addr = bridge.worker_socket_addr()?;
        let dispatcher =
            BridgeDispatcher::bind(worker_addr, Duration::from_millis(bridge.send_timeout_ms))
                .await?;
        Ok(Arc::new(RelayContext {
            registry: Arc::clone(&self.registry),
            fanout: Arc::clone(&self.fanout),
            classifier: self.classifier.clone(),
            dispatcher: Arc::new(dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            session: SessionConfig::from_settings(&self.settings.server),
        }))
    }

    /// Build the router for one listener.
    ///
    /// Every path upgrades to a WebSocket in `group`. `/health` and
    /// `/metrics` answer plain HTTP requests that carry no upgrade.
    pub fn router(&self, group: Group, ctx: &Arc<RelayContext>) -> Router {
        let state = ListenerState {
            group,
            ctx: Arc::clone(ctx),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            max_message_size: self.settings.server.max_message_size,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(ws_handler)
            .with_state(state)
    }

    /// Bind every socket and start all tasks.
    ///
    /// Binds, in order: bridge dispatcher, bridge listener, group A, group B.
    /// Any bind failure aborts startup.
    pub async fn listen(self) -> Result<RelayHandle> {
        let ctx = self.context().await?;

        let bridge = &self.settings.bridge;
        let listen_addr = bridge.listen_socket_addr()?;
        let bridge_listener = BridgeListener::bind(
            listen_addr,
            Arc::clone(&self.fanout),
            self.classifier.clone(),
            bridge.max_datagram_size,
        )
        .await?;

        let host = &self.settings.server.host;
        let listener_a = bind_tcp("group A listener", host, self.settings.server.group_a_port).await?;
        let listener_b = bind_tcp("group B listener", host, self.settings.server.group_b_port).await?;

        let group_a_addr = listener_a.local_addr()?;
        let group_b_addr = listener_b.local_addr()?;
        let bridge_addr = bridge_listener.local_addr()?;
        let dispatcher_addr = ctx.dispatcher.local_addr()?;

        let token = self.shutdown.token();
        let tasks = vec![
            spawn_listener(listener_a, self.router(Group::A, &ctx), Group::A, token.clone()),
            spawn_listener(listener_b, self.router(Group::B, &ctx), Group::B, token.clone()),
            tokio::spawn(bridge_listener.run(token.clone())),
            spawn_reaper(
                Arc::clone(&self.registry),
                Duration::from_secs(self.settings.reaper.interval_secs.max(1)),
                token,
            ),
        ];

        info!(
            %group_a_addr,
            %group_b_addr,
            %bridge_addr,
            %dispatcher_addr,
            worker_addr = %ctx.dispatcher.worker_addr(),
            marker = self.classifier.marker(),
            "relay listening"
        );

        Ok(RelayHandle {
            group_a_addr,
            group_b_addr,
            bridge_addr,
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            tasks,
        })
    }
}

/// A running relay.
pub struct RelayHandle {
    group_a_addr: SocketAddr,
    group_b_addr: SocketAddr,
    bridge_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Bound address of the group A listener.
    pub fn group_a_addr(&self) -> SocketAddr {
        self.group_a_addr
    }

    /// Bound address of the group B listener.
    pub fn group_b_addr(&self) -> SocketAddr {
        self.group_b_addr
    }

    /// Bound address of a group's listener.
    pub fn addr(&self, group: Group) -> SocketAddr {
        match group {
            Group::A => self.group_a_addr,
            Group::B => self.group_b_addr,
        }
    }

    /// Bound address of the bridge listener.
    pub fn bridge_addr(&self) -> SocketAddr {
        self.bridge_addr
    }

    /// Group membership.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Token cancelled when shutdown starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    /// Stop accepting, close every connection and wait for all tasks.
    ///
    /// Returns `true` if everything stopped within `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let tasks_done = self.shutdown.graceful_shutdown(self.tasks, timeout).await;

        while self.registry.total() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let remaining = self.registry.total();
        if remaining > 0 {
            error!(remaining, "connections still registered after shutdown");
        }
        info!("relay stopped");
        tasks_done && remaining == 0
    }
}

async fn bind_tcp(what: &'static str, host: &str, port: u16) -> Result<TcpListener> {
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::bind(what, addr, e))
}

fn spawn_listener(
    listener: TcpListener,
    router: Router,
    group: Group,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            error!(%group, error = %e, "listener failed");
        }
    })
}

/// Upgrade attempt on a reserved path; `Err` for plain HTTP.
type MaybeUpgrade = std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>;
type MaybeRemote = std::result::Result<ConnectInfo<SocketAddr>, ExtensionRejection>;

/// GET /health
async fn health_handler(
    ws: MaybeUpgrade,
    remote: MaybeRemote,
    State(state): State<ListenerState>,
) -> Response {
    if let (Ok(ws), Ok(ConnectInfo(remote))) = (ws, remote) {
        return upgrade(ws, remote, state);
    }
    let health: HealthResponse =
        health::health_check(state.start_time, state.group, &state.ctx.registry);
    Json(health).into_response()
}

/// GET /metrics
async fn metrics_handler(
    ws: MaybeUpgrade,
    remote: MaybeRemote,
    State(state): State<ListenerState>,
) -> Response {
    if let (Ok(ws), Ok(ConnectInfo(remote))) = (ws, remote) {
        return upgrade(ws, remote, state);
    }
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Any other path: WebSocket upgrade into this listener's group.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<ListenerState>,
) -> Response {
    upgrade(ws, remote, state)
}

fn upgrade(ws: WebSocketUpgrade, remote: SocketAddr, state: ListenerState) -> Response {
    if state.ctx.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let ListenerState {
        group,
        ctx,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_session(socket, group, remote, ctx))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use crossbar_settings::SettingsError;
    use tower::ServiceExt;

    use super::*;

    fn test_settings() -> CrossbarSettings {
        let mut settings = CrossbarSettings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.group_a_port = 0;
        settings.server.group_b_port = 0;
        settings.bridge.listen_addr = "127.0.0.1:0".into();
        settings.bridge.worker_addr = "127.0.0.1:9".into();
        settings
    }

    async fn request(app: Router, uri: &str) -> Response {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_group() {
        let server = RelayServer::new(test_settings());
        let ctx = server.context().await.unwrap();
        let resp = request(server.router(Group::B, &ctx), "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["group"], "b");
        assert_eq!(parsed["group_a"], 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let server = RelayServer::new(test_settings());
        let ctx = server.context().await.unwrap();
        let resp = request(server.router(Group::A, &ctx), "/metrics").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn plain_http_on_other_paths_is_rejected() {
        let server = RelayServer::new(test_settings());
        let ctx = server.context().await.unwrap();
        let resp = request(server.router(Group::A, &ctx), "/anything").await;
        assert!(resp.status().is_client_error(), "got {}", resp.status());
    }

    #[test]
    fn new_validates_heartbeat_against_reaper() {
        let mut settings = test_settings();
        settings.server.heartbeat_timeout_secs = 90;
        settings.reaper.interval_secs = 5;
        let server = RelayServer::new(settings);
        assert_eq!(server.settings().server.heartbeat_timeout_secs, 5);
        assert!(server.settings().server.heartbeat_interval_secs <= 2);
    }

    #[tokio::test]
    async fn invalid_worker_addr_fails_startup() {
        let mut settings = test_settings();
        settings.bridge.worker_addr = "not an addr".into();
        let err = RelayServer::new(settings).listen().await.err().unwrap();
        assert!(matches!(
            err,
            RelayError::Settings(SettingsError::InvalidAddress { field: "bridge.workerAddr", .. })
        ));
    }

    #[tokio::test]
    async fn port_in_use_fails_startup() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut settings = test_settings();
        settings.server.group_b_port = taken.local_addr().unwrap().port();
        let err = RelayServer::new(settings).listen().await.err().unwrap();
        assert!(matches!(err, RelayError::Bind { what: "group B listener", .. }));
    }

    #[tokio::test]
    async fn listen_and_shutdown() {
        let handle = RelayServer::new(test_settings()).listen().await.unwrap();
        assert_ne!(handle.group_a_addr().port(), 0);
        assert_ne!(handle.group_b_addr(), handle.group_a_addr());
        assert_ne!(handle.bridge_addr().port(), 0);
        assert_eq!(handle.addr(Group::B), handle.group_b_addr());
        let token = handle.shutdown_token();
        assert!(handle.shutdown(Duration::from_secs(5)).await);
        assert!(token.is_cancelled());
    }
}
