//! `RelayServer`: Axum HTTP + WebSocket server.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, Extensions, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::ClientId;
use relay_settings::{RunMode, Settings};
use relay_store::{Database, UserRepo};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::assets;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::users;
use crate::websocket::{self, ConnectionConfig, DemoPublisher, Hub, HubHandle};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub connection: ConnectionConfig,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// The relay server: hub, observer and HTTP surface.
pub struct RelayServer {
    settings: Settings,
    hub: HubHandle,
    demo: DemoPublisher,
    users: UserRepo,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayServer {
    /// Create the server and start the hub and observer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(settings: Settings, db: Database) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let token = shutdown.token();

        let (hub, sink, hub_task) = Hub::spawn(&settings.hub, token.clone());
        let demo = DemoPublisher::new(hub.clone(), settings.hub.demo_tick(), token.clone());
        let observer = websocket::spawn_observer(sink, demo.clone(), token);

        Self {
            settings,
            hub,
            demo,
            users: UserRepo::new(db),
            shutdown,
            start_time: Instant::now(),
            metrics: None,
            tasks: vec![hub_task, observer],
        }
    }

    /// Expose `/metrics` rendered from `handle`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            connection: ConnectionConfig::from(&self.settings.hub),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let api = Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .nest("/users", users::routes(self.users.clone()));

        let router = Router::new()
            .nest("/api", api)
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let router = assets::mount(router, &self.settings.server.static_dir)
            .layer(CorsLayer::permissive());

        match self.settings.server.mode {
            RunMode::Debug => router.layer(TraceLayer::new_for_http()),
            RunMode::Release => router,
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn demo(&self) -> &DemoPublisher {
        &self.demo
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Bind and serve in the background.
    ///
    /// The returned task finishes after the shutdown token is cancelled and
    /// in-flight requests and background tasks have drained (bounded by
    /// `server.shutdownTimeoutSecs`).
    pub async fn listen(self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let listener = TcpListener::bind(self.settings.server.address()).await?;
        let addr = listener.local_addr()?;
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        let timeout = self.settings.server.shutdown_timeout();
        let shutdown = self.shutdown;
        let mut tasks = self.tasks;
        let demo = self.demo;
        let token = shutdown.token();

        info!(%addr, "relay server listening");

        let handle = tokio::spawn(async move {
            let stop = token.clone();
            let server = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .into_future();
            let drain_deadline = async {
                token.cancelled().await;
                tokio::time::sleep(timeout).await;
            };

            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "server error");
                    }
                }
                () = drain_deadline => warn!(?timeout, "in-flight requests did not drain in time"),
            }

            tasks.extend(demo.take_task());
            shutdown.graceful_shutdown(tasks, Some(timeout)).await;
            info!("relay server stopped");
        });

        Ok((addr, handle))
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    pub async fn run<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let (_addr, handle) = self.listen().await?;

        let _ = tokio::spawn(async move {
            signal.await;
            shutdown.shutdown();
        });

        if let Err(e) = handle.await {
            error!(error = %e, "server task failed");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /api/ws: upgrade and hand the socket to the hub.
///
/// `clientId` names the connection; without it the peer IP is used.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    extensions: Extensions,
    State(state): State<AppState>,
) -> Response {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let id = ClientId::or_fallback(query.client_id.as_deref(), peer);

    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let max = state.connection.max_frame_bytes;
    let hub = state.hub.clone();
    let config = state.connection.clone();
    let cancel = state.shutdown.token();

    ws.max_message_size(max)
        .max_frame_size(max)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| websocket::serve_connection(socket, id, hub, config, cancel))
}
