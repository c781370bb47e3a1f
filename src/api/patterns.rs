use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::error;
use crate::db::store;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/patterns/anomalies", get(anomalies))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct AnomaliesQuery {
    hours: Option<u32>,
}

/// GET /api/patterns/anomalies?hours=H — Detected anomalies, oldest first.
async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnomaliesQuery>,
) -> impl IntoResponse {
    let hours = match error::validate_range("hours", query.hours.unwrap_or(24), 1, 168) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to_ms = chrono::Utc::now().timestamp_millis();
    let from_ms = to_ms - i64::from(hours) * 3_600_000;
    match store::anomalies(&state.db, from_ms, to_ms).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error::internal_error("anomalies", e),
    }
}
