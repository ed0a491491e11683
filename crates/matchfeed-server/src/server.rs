use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use matchfeed_store::{CommentaryRepo, Database, MatchRepo};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broadcast::Broadcaster;
use crate::hub::ConnectionHub;
use crate::liveness::LivenessMonitor;
use crate::protocol::ProtocolHandler;
use crate::replay::ReplayEngine;
use crate::{routes, socket};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a single WebSocket frame and message.
    pub max_frame_bytes: usize,
    pub max_send_queue: usize,
    pub heartbeat_interval: Duration,
    pub replay_poll_interval: Duration,
    /// Span over which one poll's batch is spread.
    pub replay_window: Duration,
    pub replay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
            max_frame_bytes: 1024 * 1024,
            max_send_queue: 256,
            heartbeat_interval: Duration::from_secs(30),
            replay_poll_interval: Duration::from_secs(2),
            replay_window: Duration::from_secs(2),
            replay: true,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub matches: MatchRepo,
    pub commentary: CommentaryRepo,
    pub hub: Arc<ConnectionHub>,
    pub broadcaster: Broadcaster,
    pub protocol: ProtocolHandler,
    pub max_frame_bytes: usize,
}

impl AppState {
    pub fn new(db: Database, hub: Arc<ConnectionHub>, max_frame_bytes: usize) -> Self {
        Self {
            matches: MatchRepo::new(db.clone()),
            commentary: CommentaryRepo::new(db),
            broadcaster: Broadcaster::new(Arc::clone(&hub)),
            protocol: ProtocolHandler::new(Arc::clone(&hub)),
            hub,
            max_frame_bytes,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(routes::health))
        .route("/matches", get(routes::list_matches).post(routes::create_match))
        .route(
            "/matches/{id}/commentary",
            get(routes::list_commentary).post(routes::create_commentary),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, then run the HTTP/WebSocket server, the liveness monitor and the
/// replay engine until the returned handle is shut down.
pub async fn start(config: ServerConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let hub = Arc::new(ConnectionHub::new(config.max_send_queue, shutdown.clone()));
    let state = AppState::new(db, Arc::clone(&hub), config.max_frame_bytes);

    let liveness = LivenessMonitor::new(Arc::clone(&hub), config.heartbeat_interval)
        .spawn(shutdown.clone());

    let replay = config.replay.then(|| {
        let engine = ReplayEngine::new(
            Arc::new(state.commentary.clone()),
            state.broadcaster.clone(),
            config.replay_poll_interval,
            config.replay_window,
            Utc::now(),
        );
        Arc::new(engine).spawn(shutdown.clone())
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, replay = config.replay, "matchfeed server started");

    let graceful = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        hub,
        shutdown,
        server,
        liveness,
        replay,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running;
/// call `shutdown` to stop it.
pub struct ServerHandle {
    pub port: u16,
    hub: Arc<ConnectionHub>,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    liveness: JoinHandle<()>,
    replay: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn connections(&self) -> usize {
        self.hub.count()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.hub.close_all();
        let _ = self.liveness.await;
        if let Some(replay) = self.replay {
            let _ = replay.await;
        }
        let _ = self.server.await;
        tracing::info!("matchfeed server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_frame_size(state.max_frame_bytes)
        .max_message_size(state.max_frame_bytes)
        .on_upgrade(move |socket| socket::run(socket, state.hub, state.protocol))
}
