//! HTTP and WebSocket surface for the tracker.
//!
//! This module provides an HTTP server that:
//! - Accepts tracking commands under `/api/tracking`
//! - Serves per-target analyses
//! - Upgrades `/ws` to the real-time event stream
//!
//! # Architecture
//!
//! ```text
//! Dashboard ──→ POST /api/tracking/start ──→ coordinator ──→ scheduler ──→ transport
//!     ↑                                                           │
//!     └──────────── /ws ←── broadcaster ←── pipeline ←── events ──┘
//! ```

use crate::config::Config;
use crate::coordinator::{CommandError, StartOutcome, StopOutcome, TrackingCoordinator};
use crate::core::Analysis;
use crate::probe::{ProbeTransport, SimulatedTransport};
use crate::realtime::socket;
use crate::realtime::StatusSnapshot;
use axum::{
    extract::{rejection::JsonRejection, Path, State, WebSocketUpgrade},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Everything else
    pub app: Config,
}

impl ServerConfig {
    /// Use the port from the application config.
    pub fn new(app: Config) -> Self {
        Self {
            port: app.server.port,
            app,
        }
    }
}

/// Shared server state
#[derive(Clone)]
struct AppState {
    coordinator: Arc<TrackingCoordinator>,
    heartbeat: Duration,
}

/// Handle to a running server.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub coordinator: Arc<TrackingCoordinator>,
    shutdown_tx: oneshot::Sender<()>,
    background: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Stop tracking, close observers and stop accepting connections.
    pub fn shutdown(self) {
        self.coordinator.shutdown();
        let _ = self.shutdown_tx.send(());
        for task in self.background {
            task.abort();
        }
    }
}

/// Tracking command body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackRequest {
    #[serde(default, alias = "phoneNumber")]
    pub target: Option<String>,
    #[serde(default)]
    pub interval: Option<u64>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Serialize)]
struct StartResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    outcome: StartOutcome,
}

#[derive(Serialize)]
struct StopResponse {
    success: bool,
    message: String,
    #[serde(flatten)]
    outcome: StopOutcome,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopAllResponse {
    success: bool,
    message: String,
    stopped_count: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    success: bool,
    #[serde(flatten)]
    status: StatusSnapshot,
}

#[derive(Serialize)]
struct AnalysisResponse {
    success: bool,
    analysis: Analysis,
}

#[derive(Serialize)]
struct AnalysesResponse {
    success: bool,
    count: usize,
    analyses: Vec<Analysis>,
}

/// A rejected request rendered as `{error, code}`.
enum ApiError {
    Command(CommandError),
    /// Body missing, not JSON, or not shaped like a [`TrackRequest`]
    Body(JsonRejection),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Command(e) => match e {
                CommandError::MissingTarget
                | CommandError::InvalidTarget(_)
                | CommandError::IntervalOutOfRange { .. } => StatusCode::BAD_REQUEST,
                CommandError::AlreadyTracked(_) => StatusCode::CONFLICT,
                CommandError::CapacityExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                CommandError::TransportNotReady => StatusCode::SERVICE_UNAVAILABLE,
                CommandError::NotTracked(_) => StatusCode::NOT_FOUND,
            },
            Self::Body(rejection) => rejection.status(),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Command(e) => ErrorResponse {
                error: e.to_string(),
                code: e.code().to_string(),
            },
            Self::Body(rejection) => ErrorResponse {
                error: rejection.body_text(),
                code: "INVALID_REQUEST".to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// POST /api/tracking/start
async fn start_tracking(
    State(state): State<AppState>,
    body: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(req) = body?;
    let outcome = state
        .coordinator
        .start(req.target.as_deref(), req.interval)
        .map_err(|e| {
            tracing::debug!(error = %e, "Start rejected");
            e
        })?;

    Ok(Json(StartResponse {
        success: true,
        message: format!("Started tracking {}", outcome.target),
        outcome,
    }))
}

/// POST /api/tracking/stop
async fn stop_tracking(
    State(state): State<AppState>,
    body: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<StopResponse>, ApiError> {
    let Json(req) = body?;
    let outcome = state.coordinator.stop(req.target.as_deref())?;

    Ok(Json(StopResponse {
        success: true,
        message: format!("Stopped tracking {}", outcome.target),
        outcome,
    }))
}

/// GET|POST /api/tracking/stop-all
async fn stop_all(State(state): State<AppState>) -> Json<StopAllResponse> {
    let stopped_count = state.coordinator.stop_all();
    Json(StopAllResponse {
        success: true,
        message: "Stopped tracking all targets".to_string(),
        stopped_count,
    })
}

/// GET /api/tracking/status
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        status: state.coordinator.status(),
    })
}

/// GET /api/tracking/analysis/:target
async fn analysis(State(state): State<AppState>, Path(target): Path<String>) -> Response {
    match state.coordinator.analysis(&target) {
        Some(analysis) => Json(AnalysisResponse {
            success: true,
            analysis,
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No data available for {target}"),
                code: "NO_DATA".to_string(),
            }),
        )
            .into_response(),
    }
}

/// GET /api/tracking/analyses
async fn all_analyses(State(state): State<AppState>) -> Json<AnalysesResponse> {
    let analyses = state.coordinator.all_analyses();
    Json(AnalysesResponse {
        success: true,
        count: analyses.len(),
        analyses,
    })
}

/// GET /ws
async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |stream| socket::run_session(stream, state.coordinator, state.heartbeat))
}

fn router(state: AppState, frontend_origin: &str) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(frontend_origin)?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/api/tracking/start", post(start_tracking))
        .route("/api/tracking/stop", post(stop_tracking))
        .route("/api/tracking/stop-all", get(stop_all).post(stop_all))
        .route("/api/tracking/status", get(status))
        .route("/api/tracking/analysis/:target", get(analysis))
        .route("/api/tracking/analyses", get(all_analyses))
        .route("/ws", get(websocket))
        .layer(cors)
        .with_state(state))
}

/// Run the server with the simulated transport.
///
/// The transport connects in the background; start commands are rejected
/// until it is ready.
pub async fn run(config: ServerConfig) -> anyhow::Result<RunningServer> {
    let transport = Arc::new(SimulatedTransport::new(config.app.simulation.clone()));
    let connecting = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.connect().await })
    };

    let mut server = run_with_transport(config, transport).await?;
    server.background.push(connecting);
    Ok(server)
}

/// Run the server around an already constructed transport.
pub async fn run_with_transport(
    config: ServerConfig,
    transport: Arc<dyn ProbeTransport>,
) -> anyhow::Result<RunningServer> {
    let (coordinator, pipeline) = TrackingCoordinator::new(&config.app, transport)?;
    let coordinator = Arc::new(coordinator);

    let state = AppState {
        coordinator: coordinator.clone(),
        heartbeat: config.app.server.heartbeat,
    };
    let app = router(state, &config.app.server.frontend_origin)?;

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("RTT tracker listening on http://{}", actual_addr);

    let background = vec![pipeline.spawn(), coordinator.spawn_sweeper()];
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok(RunningServer {
        addr: actual_addr,
        coordinator,
        shutdown_tx,
        background,
    })
}
