use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::metrics;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(handlers::health_check))
        .route("/problems", get(handlers::list_problems))
        .route("/problems/:id", get(handlers::get_problem))
        .route("/problems/:id/submit", post(handlers::submit_problem))
        .route("/run", post(handlers::run_code))
        .route("/submit", post(handlers::submit_fixtures))
        .route("/metrics", get(metrics::metrics_handler))
}
