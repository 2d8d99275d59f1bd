//! Route composition. Grounded verbatim in shape on
//! `crates/server/src/routes/mod.rs`'s `api_routes()` — one sub-router per
//! concern, nested under `/api`, all sharing the one `Arc<AppState>`.

pub mod config;
pub mod health;
pub mod metrics;
pub mod query;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// All API routes nested under `/api`.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(health::router())
                .merge(query::router())
                .merge(config::router())
                .merge(ws::router())
                .merge(metrics::router()),
        )
        .with_state(state)
}
