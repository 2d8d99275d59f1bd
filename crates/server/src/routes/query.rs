//! `POST /query` (spec.md §6): submit a fresh Logical Query or resume one
//! via `previous`. Picks the first batch with the Batch Selector and hands
//! off to the Job Submitter; the websocket carries everything after that.

use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use corpusq_core::{SelectorDecision, SelectorInput};
use serde::Serialize;

use crate::engine::controller::LogicalQuery;
use crate::engine::job_submitter::{self, SubmitOutcome};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub use crate::engine::controller::QueryRequest;

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub status: String,
    pub job: String,
}

/// Resolves `previous` (spec.md §6 "resumes `previous`") against the
/// registry: a still-known, not-canceled Logical Query hands back its
/// accumulated `done_batches`/`result_map`/`total_results_so_far` the same
/// way a listener-driven manual continuation does (spec.md §4.6), so a
/// client paging through a quota-bounded query doesn't restart from zero.
/// An unknown or canceled `previous` falls back to a fresh Logical Query —
/// mirrors `lcpvian/qi.py`'s `from_request`, which tolerates a stale
/// `previous` rather than erroring the request.
fn resume_or_start(state: &AppState, request: &QueryRequest) -> LogicalQuery {
    if let Some(previous_id) = &request.previous {
        if let Ok(registry) = state.logical_queries.read() {
            if let Some(prior) = registry.get(previous_id) {
                if !prior.is_canceled() {
                    let mut resumed = LogicalQuery::from_manual_continuation(prior);
                    resumed.total_results_requested = request.total_results_requested;
                    resumed.page_size = request.page_size;
                    resumed.want_sentences = request.sentences;
                    resumed.full = request.full;
                    resumed.to_export = request.to_export.clone();
                    return resumed;
                }
            }
        }
    }
    LogicalQuery::from_request(request)
}

async fn submit_query(State(state): State<Arc<AppState>>, Json(request): Json<QueryRequest>) -> ApiResult<Json<QueryResponse>> {
    if request.corpora.is_empty() {
        return Err(ApiError::InvalidRequest("corpora must not be empty".to_string()));
    }

    let mut logical = resume_or_start(&state, &request);
    let all_batches = state.batches_for(&logical.corpora);

    let decision = corpusq_core::select_next_batch(&SelectorInput {
        all_batches: &all_batches,
        done_batches: &logical.done_batches,
        total_results_so_far: logical.total_results_so_far,
        needed: logical.needed(),
        full: logical.full,
        page_size: logical.page_size,
        is_single_batch: all_batches.len() == 1,
        resume: request.previous.is_some(),
    });

    let batch = match decision {
        SelectorDecision::Next(batch) => batch,
        SelectorDecision::NoMoreData => return Err(ApiError::NoBatch),
    };

    let outcome = job_submitter::submit_primary(state, &mut logical, batch).await?;
    crate::metrics::record_iteration(if logical.full { "full" } else { "quota" });

    Ok(Json(QueryResponse {
        status: match outcome {
            SubmitOutcome::Replayed => "replayed".to_string(),
            SubmitOutcome::Enqueued => "enqueued".to_string(),
        },
        job: logical.id.unwrap_or_default(),
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/query", post(submit_query))
}
