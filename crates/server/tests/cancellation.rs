//! Cancellation across iterations (spec.md §8 S5, §4.6 "a cancellation from
//! the client targets the Logical Query... for every not-yet-terminal
//! iteration job"). Drives the engine directly rather than through the
//! websocket route (whose handler is private to the crate), against a
//! `DbExecutor` slow enough to cancel mid-flight — grounded on
//! `adapters/worker_runtime.rs`'s own `stop_is_idempotent` test, which uses
//! the same "enqueue a job that waits on its cancel receiver" shape.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corpusq_cache::{InMemoryCache, LocalChannel};
use corpusq_core::Batch;
use corpusq_server::adapters::{AdapterError, DbExecutor, DbRow, NoopExportWriter, NoopPrefilter, StubSqlGenerator, TokioWorkerRuntime};
use corpusq_server::config::EngineConfig;
use corpusq_server::engine::controller::{LogicalQuery, LogicalQueryState, QueryRequest};
use corpusq_server::engine::job_submitter::{self, SubmitOutcome};
use corpusq_server::state::AppState;

fn sample_request() -> QueryRequest {
    QueryRequest {
        user: "u1".into(),
        room: "r1".into(),
        corpora: vec![1],
        query: serde_json::json!({"q": true}),
        languages: vec!["eng".into()],
        total_results_requested: 1000,
        page_size: 5,
        sentences: false,
        full: true,
        previous: None,
        to_export: None,
    }
}

/// Returns instantly on its first call, then sleeps long enough for a test
/// to cancel the second call before it completes.
#[derive(Default)]
struct FastThenSlowExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl DbExecutor for FastThenSlowExecutor {
    async fn execute(&self, sql: &str, _params: &[serde_json::Value], _single_row: bool) -> Result<Vec<DbRow>, AdapterError> {
        if sql.trim().is_empty() {
            return Err(AdapterError::DbExecution("empty sql text".into()));
        }
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(Vec::new())
    }
}

fn test_state() -> Arc<AppState> {
    AppState::new(
        EngineConfig::default(),
        Arc::new(InMemoryCache::new()),
        Arc::new(LocalChannel::default()),
        Arc::new(TokioWorkerRuntime::new()),
        Arc::new(StubSqlGenerator),
        Arc::new(NoopPrefilter),
        Arc::new(FastThenSlowExecutor::default()),
        Arc::new(NoopExportWriter),
    )
}

/// A cancellation issued against the Logical Query's *current* primary job
/// id (not its stable `id`, which by the second iteration names a job that
/// already finished) stops that iteration's aggregation from ever landing.
#[tokio::test]
async fn canceling_the_current_iteration_suppresses_its_late_completion() {
    let state = test_state();
    state.corpus_batches.write().unwrap().insert(
        1,
        vec![Batch::new(1, "schema1", "small", 10), Batch::new(1, "schema1", "large", 100)],
    );

    let mut logical = LogicalQuery::from_request(&sample_request());
    let batch_one = Batch::new(1, "schema1", "small", 10);
    let outcome = job_submitter::submit_primary(state.clone(), &mut logical, batch_one.clone()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Enqueued);

    let stable_id = logical.id.clone().unwrap();
    let first_primary_id = logical.current_primary_job_id.clone().unwrap();
    assert_eq!(stable_id, first_primary_id, "the first iteration's primary job id seeds the stable id");

    // Submit the second iteration directly, as the listener would once the
    // first batch's envelope reports "partial".
    let mut next = LogicalQuery::from_manual_continuation(&logical);
    next.done_batches.push(batch_one);
    let batch_two = Batch::new(1, "schema1", "large", 100);
    job_submitter::submit_primary(state.clone(), &mut next, batch_two).await.unwrap();

    let second_primary_id = next.current_primary_job_id.clone().unwrap();
    assert_ne!(
        second_primary_id, stable_id,
        "the second iteration's primary must fingerprint differently from the first"
    );

    // Persist the continuation so the callback can find it by the stable id.
    state.logical_queries.write().unwrap().insert(stable_id.clone(), next);

    // Cancel using the *current* primary id, the way the websocket route's
    // in-flight resolution does, not the stale first-iteration id.
    {
        let mut registry = state.logical_queries.write().unwrap();
        let entry = registry.get_mut(&stable_id).unwrap();
        entry.cancel(vec![second_primary_id.clone()]);
    }
    state.worker.stop(&second_primary_id).await.unwrap();

    // The slow second batch's DB call is still in flight; let it finish and
    // run its on_success hook.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let registry = state.logical_queries.read().unwrap();
    let logical = registry.get(&stable_id).unwrap();
    assert!(logical.is_canceled());
    assert_eq!(logical.done_batches.len(), 1, "the canceled iteration must not have merged its (late) result");
    assert_ne!(logical.state, LogicalQueryState::Terminal);
}
