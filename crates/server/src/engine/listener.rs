//! Pub/Sub Listener & Fan-out (spec.md §4.7): the single task that turns
//! published envelopes into websocket frames, and a partial iteration into
//! the next submitted batch. Grounded on `lcpvian/query_service.py`'s
//! `send_all_data()` — same "route to room, keep going while partial" loop,
//! generalised from its single in-process call site to a standing task fed
//! by the shared broadcast channel.

use std::sync::Arc;
use std::time::Duration;

use corpusq_cache::{Envelope, LocalChannel};
use corpusq_core::{SelectorDecision, SelectorInput};
use tokio::sync::broadcast::error::RecvError;

use crate::engine::controller::{IterationStatus, LogicalQuery, LogicalQueryState};
use crate::engine::job_submitter;
use crate::state::AppState;

/// How often the connection table is swept for closed transports
/// (spec.md §4.7 "a secondary task sweeps the client-connection table
/// periodically").
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawns the fan-out loop and the periodic connection sweep. Runs for the
/// lifetime of the process; `main` spawns this once at startup.
pub fn spawn(state: Arc<AppState>, channel: Arc<LocalChannel>) {
    let fanout_state = state.clone();
    let mut rx = channel.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => handle_envelope(fanout_state.clone(), envelope).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "listener lagged behind publisher, some messages dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            state.sweep_closed_connections();
        }
    });
}

/// Forwards one envelope to every live connection in its room (spec.md
/// §4.7 step 2), then, on a partial primary result, submits the next
/// iteration (steps 3-4).
async fn handle_envelope(state: Arc<AppState>, envelope: Envelope) {
    forward_to_room(&state, &envelope);

    if envelope.action == "query" && envelope.status.as_deref() == Some("partial") {
        continue_iteration(state, envelope).await;
    }
}

fn forward_to_room(state: &Arc<AppState>, envelope: &Envelope) {
    let message = match serde_json::to_string(envelope) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize envelope for fan-out");
            return;
        }
    };

    let rooms = match state.connections.read() {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!("connections lock poisoned forwarding: {e}");
            return;
        }
    };
    if let Some(handles) = rooms.get(&envelope.room) {
        for handle in handles {
            let _ = handle.tx.send(message.clone());
        }
    }
}

/// Looks up the owning Logical Query; if it's still `CONTINUE`, synthesises
/// a manual continuation and submits the next batch the selector picks
/// (spec.md §4.6 "manual continuation", §4.3).
async fn continue_iteration(state: Arc<AppState>, envelope: Envelope) {
    let logical_id = envelope.job.clone();

    let (mut next, batches) = {
        let registry = match state.logical_queries.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("logical_queries lock poisoned continuing: {e}");
                return;
            }
        };
        let Some(prior) = registry.get(&logical_id) else {
            return;
        };
        if prior.is_canceled() || prior.state != LogicalQueryState::Continue {
            return;
        }
        let batches = state.batches_for(&prior.corpora);
        (LogicalQuery::from_manual_continuation(prior), batches)
    };

    let decision = corpusq_core::select_next_batch(&SelectorInput {
        all_batches: &batches,
        done_batches: &next.done_batches,
        total_results_so_far: next.total_results_so_far,
        needed: next.needed(),
        full: next.full,
        page_size: next.page_size,
        is_single_batch: batches.len() == 1,
        resume: false,
    });

    let batch = match decision {
        SelectorDecision::Next(batch) => batch,
        SelectorDecision::NoMoreData => {
            next.advance(IterationStatus::Finished);
            if let Ok(mut registry) = state.logical_queries.write() {
                registry.insert(logical_id, next);
            }
            return;
        }
    };

    if let Err(e) = job_submitter::submit_primary(state.clone(), &mut next, batch).await {
        tracing::error!(error = %e, "failed to submit continuation batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::controller::QueryRequest;
    use corpusq_core::Batch;

    fn sample_request() -> QueryRequest {
        QueryRequest {
            user: "u1".into(),
            room: "r1".into(),
            corpora: vec![1],
            query: serde_json::json!({}),
            languages: vec!["eng".into()],
            total_results_requested: 10,
            page_size: 5,
            sentences: true,
            full: false,
            previous: None,
            to_export: None,
        }
    }

    #[tokio::test]
    async fn continue_iteration_advances_to_terminal_when_no_batches_remain() {
        let state = AppState::with_defaults(EngineConfig::default());
        let mut logical = LogicalQuery::from_request(&sample_request());
        logical.id = Some("job1".into());
        logical.done_batches.push(Batch::new(1, "s", "only", 100));
        logical.state = LogicalQueryState::Continue;
        state.logical_queries.write().unwrap().insert("job1".into(), logical);
        state.corpus_batches.write().unwrap().insert(1, vec![Batch::new(1, "s", "only", 100)]);

        let envelope = Envelope::new("query", "u1", "r1", "job1").with_status("partial");
        continue_iteration(state.clone(), envelope).await;

        let registry = state.logical_queries.read().unwrap();
        assert!(!registry.contains_key("job1") || registry.get("job1").unwrap().state != LogicalQueryState::Continue);
    }

    #[tokio::test]
    async fn continue_iteration_is_a_noop_when_not_in_continue_state() {
        let state = AppState::with_defaults(EngineConfig::default());
        let mut logical = LogicalQuery::from_request(&sample_request());
        logical.id = Some("job1".into());
        state.logical_queries.write().unwrap().insert("job1".into(), logical);

        let envelope = Envelope::new("query", "u1", "r1", "job1").with_status("partial");
        continue_iteration(state.clone(), envelope).await;

        assert_eq!(state.logical_queries.read().unwrap().get("job1").unwrap().state, LogicalQueryState::Created);
    }
}
