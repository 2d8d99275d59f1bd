//! API error taxonomy (spec.md §7). Worker-side failures never reach here —
//! they're classified and published by the callback layer instead; this
//! type only covers synchronous HTTP-handler failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Present for `InvalidRequest` refusals that carry a specific websocket
    /// `action` name (`no_batch`, `kwic_limit`) so clients can branch
    /// without string-matching `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into(), details: None, action: None }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self { error: error.into(), details: Some(details.into()), action: None }
    }

    pub fn with_action(error: impl Into<String>, action: impl Into<String>) -> Self {
        Self { error: error.into(), details: None, action: Some(action.into()) }
    }
}

/// **InvalidRequest** (spec.md §7) is split into its two named refusals plus
/// a generic catch-all, because each carries a distinct websocket `action`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    InvalidRequest(String),

    #[error("no batch available for this query")]
    NoBatch,

    #[error("kwic line limit exceeded")]
    KwicLimitExceeded,

    #[error("logical query not found: {0}")]
    QueryNotFound(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] corpusq_cache::CacheError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidRequest(msg) => {
                tracing::warn!(message = %msg, "invalid request");
                (StatusCode::BAD_REQUEST, ErrorResponse::with_details("Invalid request", msg.clone()))
            }
            ApiError::NoBatch => {
                tracing::warn!("no batch available");
                (StatusCode::BAD_REQUEST, ErrorResponse::with_action("No batch available", "no_batch"))
            }
            ApiError::KwicLimitExceeded => {
                tracing::warn!("kwic limit exceeded");
                (StatusCode::BAD_REQUEST, ErrorResponse::with_action("KWIC line limit exceeded", "kwic_limit"))
            }
            ApiError::QueryNotFound(id) => {
                tracing::warn!(query_id = %id, "logical query not found");
                (StatusCode::NOT_FOUND, ErrorResponse::with_details("Query not found", format!("id: {id}")))
            }
            ApiError::CacheUnavailable(err) => {
                tracing::error!(error = %err, "cache unreachable");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("Internal server error"))
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new("Internal server error"))
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
