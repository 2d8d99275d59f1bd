//! Websocket endpoint (spec.md §4.7, §6): registers a connection under its
//! room so the listener can fan published envelopes out to it, and accepts
//! client-initiated `cancel` messages. Grounded on
//! `crates/relay/src/ws.rs`'s `handle_socket` (split sink/stream, forward a
//! channel into the sink, read-loop on the stream) and `routes/terminal.rs`'s
//! `ConnectionGuard` (RAII disconnect on every exit path, including panics).

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::engine::controller::LogicalQuery;
use crate::state::{AppState, ConnectionId};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub room: String,
    pub user: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientMessage {
    Cancel { job: String },
}

/// Drops the connection's registry entry when the socket task ends, on any
/// exit path — matches `routes/terminal.rs`'s `ConnectionGuard`.
struct ConnectionGuard {
    state: Arc<AppState>,
    room: String,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.deregister_connection(&self.room, self.id);
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, Query(params): Query<WsParams>, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: WsParams, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.register_connection(&params.room, &params.user, tx);
    let _guard = ConnectionGuard { state: state.clone(), room: params.room.clone(), id: connection_id };

    let forward_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        if let Message::Text(text) = message {
            handle_client_message(&state, &text).await;
        }
    }

    forward_task.abort();
}

/// The only client-initiated action the websocket handles directly; every
/// other action (`query`, `sentences`, `meta`, ...) is server-to-client
/// only, pushed by the listener (spec.md §6).
///
/// `job` is the Logical Query's stable identity (its first iteration's
/// primary job id, which the registry is keyed by) — not necessarily the job
/// currently running, since later iterations get fresh primary job ids
/// (spec.md §4.6 "a cancellation from the client targets the Logical
/// Query... for every not-yet-terminal iteration job").
async fn handle_client_message(state: &Arc<AppState>, text: &str) {
    let Ok(ClientMessage::Cancel { job }) = serde_json::from_str::<ClientMessage>(text) else {
        return;
    };

    let in_flight = match state.logical_queries.write() {
        Ok(mut registry) => match registry.get_mut(&job) {
            Some(logical) => {
                let in_flight = in_flight_job_ids(logical, &job);
                logical.cancel(in_flight.clone());
                Some(in_flight)
            }
            None => None,
        },
        Err(e) => {
            tracing::error!("logical_queries lock poisoned canceling: {e}");
            return;
        }
    };

    let Some(in_flight) = in_flight else {
        return;
    };
    for job_id in in_flight {
        if let Err(e) = state.worker.stop(&job_id).await {
            tracing::warn!(error = %e, job_id, "failed to stop canceled job");
        }
    }
}

/// Every job id that could still be running for this Logical Query: the
/// client-named id plus whichever iteration's primary/sentence/metadata jobs
/// are current.
fn in_flight_job_ids(logical: &LogicalQuery, named: &str) -> Vec<String> {
    let mut ids = vec![named.to_string()];
    ids.extend(logical.current_primary_job_id.clone());
    ids.extend(logical.sentence_job_ids.last().cloned());
    ids.extend(logical.metadata_job_ids.last().cloned());
    ids.sort();
    ids.dedup();
    ids
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_upgrade))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::controller::QueryRequest;

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

    #[test]
    fn in_flight_job_ids_covers_named_and_current_iteration_jobs() {
        let mut logical = LogicalQuery::from_request(&sample_request());
        logical.current_primary_job_id = Some("primary2".into());
        logical.sentence_job_ids = vec!["sent1".into(), "sent2".into()];
        logical.metadata_job_ids = vec!["meta1".into()];

        let ids = in_flight_job_ids(&logical, "job1");
        assert_eq!(ids, vec!["job1".to_string(), "meta1".to_string(), "primary2".to_string(), "sent2".to_string()]);
    }

    #[tokio::test]
    async fn cancel_message_stops_current_iteration_jobs_not_just_the_named_id() {
        let state = AppState::with_defaults(EngineConfig::default());
        let mut logical = LogicalQuery::from_request(&sample_request());
        logical.id = Some("job1".into());
        logical.current_primary_job_id = Some("primary2".into());
        state.logical_queries.write().unwrap().insert("job1".into(), logical);

        handle_client_message(&state, r#"{"action":"cancel","job":"job1"}"#).await;

        let registry = state.logical_queries.read().unwrap();
        let updated = registry.get("job1").unwrap();
        assert!(updated.is_canceled());
        assert!(updated.job_is_canceled("primary2"));
        assert!(updated.job_is_canceled("job1"));
    }
}
