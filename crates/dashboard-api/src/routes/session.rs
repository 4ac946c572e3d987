//! Session Routes

use axum::{extract::State, Json};
use datalogger::{DeviceCapabilities, SessionState, Signal};
use obd_metrics::SessionStats;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

/// Session status
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub state: SessionState,
    pub active: bool,
    pub reconnect_attempts: u32,
    pub capabilities: Option<DeviceCapabilities>,
    pub last_signal: Option<Signal>,
    pub stats: SessionStats,
}

/// Result of a start request
#[derive(Debug, Serialize)]
pub struct StartResponse {
    /// Whether the engine accepted the session
    pub started: bool,
    pub session: SessionResponse,
}

fn status(state: &AppState) -> SessionResponse {
    let context = &state.context;
    SessionResponse {
        state: context.logger.state(),
        active: context.logger.is_active(),
        reconnect_attempts: context.logger.reconnect_attempts(),
        capabilities: context.logger.capabilities(),
        last_signal: context.signals.last(),
        stats: context.collector.session_stats(),
    }
}

/// Get session status
pub async fn get_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    Json(status(&state))
}

/// Start a session
pub async fn start(State(state): State<Arc<AppState>>) -> Json<StartResponse> {
    let started = state.context.logger.start().await;
    Json(StartResponse {
        started,
        session: status(&state),
    })
}

/// Stop the running session
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    state.context.logger.stop().await;
    Json(status(&state))
}
