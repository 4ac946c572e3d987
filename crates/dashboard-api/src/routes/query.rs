//! Query Routes

use axum::{extract::State, Json};
use obd_metrics::PidId;
use obd_query::QueryStrategyType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{ApiError, AppState};

/// Active query state
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub strategy: QueryStrategyType,
    pub ids: BTreeSet<PidId>,
    pub defaults: BTreeSet<PidId>,
}

/// Body of `POST /api/v1/query/apply`: a screen key or explicit ids
#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub screen: Option<String>,
    pub ids: Option<BTreeSet<PidId>>,
}

/// Body of `POST /api/v1/query/strategy`
#[derive(Debug, Deserialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

fn snapshot(state: &AppState) -> QueryResponse {
    let query = &state.context.query;
    QueryResponse {
        strategy: query.strategy(),
        ids: query.get_ids(),
        defaults: query.get_defaults(),
    }
}

/// Get the active strategy and its ids
pub async fn get_query(State(state): State<Arc<AppState>>) -> Json<QueryResponse> {
    Json(snapshot(&state))
}

/// Adopt a screen's selection (or an explicit id set) as the active query
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ApplyRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    match (request.screen, request.ids) {
        (Some(screen), None) => {
            state.context.apply_screen(&screen).await;
        }
        (None, Some(ids)) => {
            state.context.apply_ids(&ids).await;
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of `screen` or `ids` is required".to_string(),
            ))
        }
    }
    Ok(Json(snapshot(&state)))
}

/// Switch the active strategy
pub async fn set_strategy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StrategyRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let strategy: QueryStrategyType = request
        .strategy
        .parse()
        .map_err(|e: obd_query::QueryError| ApiError::BadRequest(e.to_string()))?;
    state.context.query.set_strategy(strategy);
    state.context.logger.update_query().await;
    Ok(Json(snapshot(&state)))
}
