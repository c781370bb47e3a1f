use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::error;
use crate::db::store;
use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status/training", get(training_status))
        .with_state(state)
}

/// GET /health — Component health matrix. Always 200, even with every
/// collector down.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health.report().await)
}

/// GET /api/status/training — Sample counts and derived readiness for
/// the external trainer.
async fn training_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (samples, oldest_ts) = match store::sample_stats(&state.db).await {
        Ok(v) => v,
        Err(e) => return error::internal_error("training_status", e),
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let hours_collected = oldest_ts
        .map(|oldest| ((now_ms - oldest).max(0)) as f64 / 3_600_000.0)
        .unwrap_or(0.0);

    let status = readiness(
        samples,
        state.config.min_training_samples,
        hours_collected,
        state.config.min_training_hours,
    );

    let mut next_steps: Vec<String> = Vec::new();
    if samples < state.config.min_training_samples {
        next_steps.push(format!(
            "keep the agent running: {samples} of {} samples collected",
            state.config.min_training_samples
        ));
    }
    if hours_collected < state.config.min_training_hours {
        next_steps.push(format!(
            "history spans {hours_collected:.1}h of the required {:.1}h",
            state.config.min_training_hours
        ));
    }
    if status.ready {
        next_steps.push("enough history collected; the trainer can run".to_string());
    }

    Json(serde_json::json!({
        "samples": samples,
        "minimum_required": state.config.min_training_samples,
        "hours_collected": hours_collected,
        "minimum_hours": state.config.min_training_hours,
        "ready": status.ready,
        "progress_ratio": status.progress_ratio,
        "next_steps": next_steps,
    }))
    .into_response()
}

pub(crate) struct Readiness {
    pub ready: bool,
    pub progress_ratio: f64,
}

/// `ready` requires both floors met; progress is the lagging ratio,
/// clamped to [0, 1].
pub(crate) fn readiness(
    samples: u64,
    min_samples: u64,
    hours: f64,
    min_hours: f64,
) -> Readiness {
    let sample_ratio = if min_samples == 0 {
        1.0
    } else {
        samples as f64 / min_samples as f64
    };
    let hour_ratio = if min_hours <= 0.0 { 1.0 } else { hours / min_hours };
    Readiness {
        ready: samples >= min_samples && hours >= min_hours,
        progress_ratio: sample_ratio.min(hour_ratio).clamp(0.0, 1.0),
    }
}
