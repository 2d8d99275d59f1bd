//! Server library: app construction, shared state, and the engine that
//! orchestrates query iteration. Grounded verbatim in shape on
//! `crates/server/src/lib.rs`'s `create_app()`/`cors_layer()` pair.

pub mod adapters;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Restricts CORS to localhost origins — this server has no business
/// being called from an arbitrary third-party page.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req_parts: &axum::http::request::Parts| {
            if let Ok(origin) = origin.to_str() {
                origin.starts_with("http://localhost:")
                    || origin.starts_with("http://127.0.0.1:")
                    || origin == "http://localhost"
                    || origin == "http://127.0.0.1"
            } else {
                false
            }
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Builds the full application router: API routes plus compression, CORS,
/// and tracing middleware.
pub fn create_app(state: Arc<AppState>) -> Router {
    routes::api_routes(state)
        .layer(CompressionLayer::new())
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}
