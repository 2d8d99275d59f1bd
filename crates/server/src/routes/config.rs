//! `POST /config` (spec.md §6): force-refresh the corpus-config cache.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConfigRefreshResponse {
    pub refreshed: bool,
}

async fn refresh_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<ConfigRefreshResponse>> {
    state.refresh_corpus_config().await?;
    Ok(Json(ConfigRefreshResponse { refreshed: true }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/config", post(refresh_config))
}
