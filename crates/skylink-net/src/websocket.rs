//! ---
//! skylink_section: "05-networking-external-interfaces"
//! skylink_subsection: "module"
//! skylink_type: "source"
//! skylink_scope: "code"
//! skylink_description: "Network connectivity and edge adapters."
//! skylink_version: "v0.1.0"
//! skylink_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use skylink_bridge::{BroadcastHub, HubStats, LinkMonitor, LinkStatus};
use skylink_common::{ServerConfig, STATUS_PATH};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

struct ServerState {
    hub: BroadcastHub,
    monitor: LinkMonitor,
    /// `None` accepts any origin.
    allowed_origins: Option<Vec<HeaderValue>>,
}

impl ServerState {
    fn origin_allowed(&self, origin: &HeaderValue) -> bool {
        match &self.allowed_origins {
            None => true,
            Some(list) => list.iter().any(|allowed| allowed == origin),
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    link: LinkStatus,
    #[serde(flatten)]
    hub: HubStats,
}

/// Builder for the server hosting the subscriber push channel.
#[derive(Clone)]
pub struct WebSocketServerBuilder {
    config: ServerConfig,
    hub: BroadcastHub,
    monitor: LinkMonitor,
}

impl WebSocketServerBuilder {
    pub fn new(config: ServerConfig, hub: BroadcastHub, monitor: LinkMonitor) -> Self {
        Self {
            config,
            hub,
            monitor,
        }
    }

    /// Override the listen address (e.g. from the command line).
    pub fn listen(mut self, listen: SocketAddr) -> Self {
        self.config.listen = listen;
        self
    }

    /// Bind the listener and serve until the returned handle is shut down.
    ///
    /// Bind failures are returned to the caller.
    pub async fn spawn(self) -> Result<WebSocketServerHandle> {
        let allowed_origins = parse_origins(&self.config)?;
        let cors = cors_layer(allowed_origins.clone());

        let listener = TcpListener::bind(self.config.listen)
            .await
            .with_context(|| format!("failed to bind push channel listener {}", self.config.listen))?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, path = %self.config.path, "websocket server listening");

        let state = Arc::new(ServerState {
            hub: self.hub,
            monitor: self.monitor,
            allowed_origins,
        });

        let app = Router::new()
            .route(&self.config.path, get(upgrade_handler))
            .route(STATUS_PATH, get(status_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "websocket server exited with error");
            }
        });

        Ok(WebSocketServerHandle {
            address: local_addr,
            path: self.config.path,
            shutdown: shutdown_tx,
            task,
        })
    }
}

fn parse_origins(config: &ServerConfig) -> Result<Option<Vec<HeaderValue>>> {
    if config.allows_any_origin() {
        return Ok(None);
    }
    config
        .allowed_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid allowed origin {origin:?}"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn cors_layer(allowed_origins: Option<Vec<HeaderValue>>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    match allowed_origins {
        None => layer.allow_origin(Any),
        Some(list) => layer.allow_origin(AllowOrigin::list(list)),
    }
}

/// Handle for the running server.
pub struct WebSocketServerHandle {
    address: SocketAddr,
    path: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// `ws://` URL of the push channel.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.address, self.path)
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

async fn status_handler(State(state): State<Arc<ServerState>>) -> Json<StatusReport> {
    Json(StatusReport {
        link: state.monitor.status(),
        hub: state.hub.stats(),
    })
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        if !state.origin_allowed(origin) {
            warn!(origin = ?origin, "rejecting subscriber from disallowed origin");
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: Arc<ServerState>) {
    let mut subscription = state.hub.register();
    let id = subscription.id();
    debug!(subscriber = %id, "websocket subscriber connected");

    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                // Evicted or hub closed.
                let Some(snapshot) = snapshot else {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };

                let Ok(text) = serde_json::to_string(&snapshot) else {
                    warn!("failed to serialise telemetry snapshot");
                    continue;
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                // Pings are answered by the protocol layer; the channel is push-only.
                if let Message::Close(_) = message {
                    break;
                }
            }
        }
    }

    debug!(subscriber = %id, "websocket subscriber disconnected");
}
