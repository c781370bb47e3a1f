use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::error;
use crate::db::store;
use crate::model::Metric;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/metrics/current", get(current))
        .route("/api/metrics/history", get(history))
        .route("/api/metrics/processes", get(processes))
        .route("/api/metrics/summary", get(summary))
        .with_state(state)
}

/// GET /api/metrics/current — Latest snapshot from the ring buffer.
async fn current(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.ring.latest().await {
        Some(snapshot) => Json(snapshot.as_ref().clone()).into_response(),
        None => error::no_data(),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    metric: Option<String>,
    hours: Option<u32>,
    max_points: Option<u32>,
}

/// GET /api/metrics/history?metric=X&hours=H&max_points=P — Decimated
/// per-metric series, chronologically ordered.
async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let Some(metric_name) = query.metric else {
        return error::bad_request("invalid_parameter", "metric is required");
    };
    let Some(metric) = Metric::parse(&metric_name) else {
        return error::bad_request(
            "invalid_parameter",
            &format!("unknown metric {metric_name:?}"),
        );
    };
    let Some(hours) = query.hours else {
        return error::bad_request("invalid_parameter", "hours is required");
    };
    let hours = match error::validate_range("hours", hours, 1, 168) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let max_points = match error::validate_range(
        "max_points",
        query.max_points.unwrap_or(1000),
        1,
        10_000,
    ) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let to_ms = chrono::Utc::now().timestamp_millis();
    let from_ms = to_ms - i64::from(hours) * 3_600_000;
    match store::history(&state.db, metric, from_ms, to_ms, max_points).await {
        Ok(points) => Json(points).into_response(),
        Err(e) => error::internal_error("history", e),
    }
}

#[derive(Debug, Deserialize)]
struct ProcessesQuery {
    limit: Option<u32>,
}

/// GET /api/metrics/processes?limit=N — Most recent process slice.
async fn processes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProcessesQuery>,
) -> impl IntoResponse {
    let limit = match error::validate_range("limit", query.limit.unwrap_or(15), 1, 100) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match store::latest_processes(&state.db, limit).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => error::internal_error("processes", e),
    }
}

#[derive(Debug, Deserialize)]
struct SummaryQuery {
    window: Option<u32>,
}

/// GET /api/metrics/summary?window=H — avg/min/max/p95 per primary metric.
async fn summary(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> impl IntoResponse {
    let Some(window) = query.window else {
        return error::bad_request("invalid_parameter", "window is required");
    };
    let window = match error::validate_range("window", window, 1, 168) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to_ms = chrono::Utc::now().timestamp_millis();
    let from_ms = to_ms - i64::from(window) * 3_600_000;
    match store::summary(&state.db, from_ms, to_ms).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error::internal_error("summary", e),
    }
}
