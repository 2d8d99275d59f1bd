//! `GET /metrics` — Prometheus text exposition.

use std::sync::Arc;

use axum::{http::StatusCode, routing::get, Router};

use crate::state::AppState;

async fn metrics_handler() -> (StatusCode, String) {
    match crate::metrics::render_metrics() {
        Some(body) => (StatusCode::OK, body),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
    }
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(metrics_handler))
}
