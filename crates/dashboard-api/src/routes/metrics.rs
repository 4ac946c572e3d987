//! Metric Routes

use axum::{
    extract::{Path, Query, State},
    Json,
};
use obd_metrics::{Metric, PidId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{ApiError, AppState};

/// Query parameters for metric endpoints
#[derive(Debug, Deserialize)]
pub struct MetricQuery {
    /// Match metrics whose `enabled` flag has this value
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Response for the metric list endpoint
#[derive(Debug, Serialize)]
pub struct MetricResponse {
    pub data: Vec<Metric>,
    pub count: usize,
}

/// List metrics in display order
pub async fn list_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricQuery>,
) -> Json<MetricResponse> {
    let data = state.context.collector.get_metrics(params.enabled);
    Json(MetricResponse {
        count: data.len(),
        data,
    })
}

/// Get one metric
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(id): Path<PidId>,
    Query(params): Query<MetricQuery>,
) -> Result<Json<Metric>, ApiError> {
    state
        .context
        .collector
        .get_metric(id, params.enabled)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("metric {} (enabled = {})", id, params.enabled)))
}
