pub mod error;
pub mod health;
pub mod metrics;
pub mod patterns;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(metrics::routes(state.clone()))
        .merge(patterns::routes(state.clone()))
        .merge(health::routes(state))
}
