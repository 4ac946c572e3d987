//! OBD-II Dashboard API Server
//!
//! REST surface over a [`DataLoggerContext`]: live metrics, the active
//! query, session control and Prometheus telemetry.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use datalogger::{DataLoggerContext, SessionState};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

mod routes;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Metrics exporter error: {0}")]
    Exporter(#[from] BuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Exporter(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub context: Arc<DataLoggerContext>,
    /// Renders `/metrics`; absent when no recorder is installed
    pub prometheus: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(context: Arc<DataLoggerContext>, prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            context,
            prometheus,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub session: SessionState,
    pub metric_count: usize,
    pub readings: u64,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/metrics", get(routes::metrics::list_metrics))
        .route("/api/v1/metrics/:id", get(routes::metrics::get_metric))
        .route("/api/v1/query", get(routes::query::get_query))
        .route("/api/v1/query/apply", post(routes::query::apply))
        .route("/api/v1/query/strategy", post(routes::query::set_strategy))
        .route("/api/v1/session", get(routes::session::get_session))
        .route("/api/v1/session/start", post(routes::session::start))
        .route("/api/v1/session/stop", post(routes::session::stop))
        .route("/metrics", get(prometheus_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let logger = &state.context.logger;
    let status = match logger.state() {
        SessionState::Error => "degraded",
        _ => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session: logger.state(),
        metric_count: state.context.collector.len(),
        readings: state.context.collector.session_stats().readings,
    })
}

/// Prometheus text exposition
async fn prometheus_handler(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .prometheus
        .as_ref()
        .map(PrometheusHandle::render)
        .ok_or_else(|| ApiError::NotFound("no metrics recorder installed".to_string()))
}

/// Install the global Prometheus recorder
pub fn install_prometheus() -> Result<PrometheusHandle, ApiError> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Run the server until it fails
pub async fn run_server(addr: &str, context: Arc<DataLoggerContext>) -> Result<(), ApiError> {
    let prometheus = match install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder unavailable: {}", e);
            None
        }
    };
    let app = create_router(Arc::new(AppState::new(context, prometheus)));

    info!("Starting dashboard API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
