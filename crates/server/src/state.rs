//! Application state for the Axum server. Grounded on
//! `crates/server/src/state.rs`'s `Arc<Self>` constructor and
//! one-field-per-subsystem layout; the subsystems themselves are this
//! repo's own (cache, pub/sub, worker runtime, adapters) rather than the
//! teacher's (db, indexing, live sessions).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use corpusq_cache::{Cache, InMemoryCache, LocalChannel, Publisher};
use corpusq_core::Batch;
use tokio::sync::mpsc;

use crate::adapters::{
    DbExecutor, ExportWriter, NoopExportWriter, NoopPrefilter, Prefilter, SqlGenerator,
    StubDbExecutor, StubSqlGenerator, TokioWorkerRuntime, WorkerRuntime,
};
use crate::config::EngineConfig;
use crate::engine::controller::LogicalQuery;

pub type ConnectionId = u64;

/// One connected client transport (websocket task), registered under every
/// room it's listening to (spec.md §4.7 step 2).
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user: String,
    pub tx: mpsc::UnboundedSender<String>,
}

/// Shared application state accessible from all route handlers and the
/// pub/sub listener.
pub struct AppState {
    pub start_time: Instant,
    pub config: EngineConfig,

    pub cache: Arc<dyn Cache>,
    pub publisher: Arc<dyn Publisher>,
    pub worker: Arc<dyn WorkerRuntime>,
    pub sql_generator: Arc<dyn SqlGenerator>,
    pub prefilter: Arc<dyn Prefilter>,
    pub db_executor: Arc<dyn DbExecutor>,
    pub export_writer: Arc<dyn ExportWriter>,

    /// Live client connections keyed by room (spec.md §4.7).
    pub connections: RwLock<HashMap<String, Vec<ConnectionHandle>>>,
    next_connection_id: AtomicU64,

    /// Logical Queries keyed by their first primary job id (spec.md §3).
    pub logical_queries: RwLock<HashMap<String, LogicalQuery>>,

    /// Batches known per corpus id, refreshed by `POST /config` (spec.md §6
    /// "Force-refresh the corpus-config cache"). Empty until refreshed or
    /// seeded directly by a test/caller.
    pub corpus_batches: RwLock<HashMap<i64, Vec<Batch>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        cache: Arc<dyn Cache>,
        publisher: Arc<dyn Publisher>,
        worker: Arc<dyn WorkerRuntime>,
        sql_generator: Arc<dyn SqlGenerator>,
        prefilter: Arc<dyn Prefilter>,
        db_executor: Arc<dyn DbExecutor>,
        export_writer: Arc<dyn ExportWriter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            cache,
            publisher,
            worker,
            sql_generator,
            prefilter,
            db_executor,
            export_writer,
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            logical_queries: RwLock::new(HashMap::new()),
            corpus_batches: RwLock::new(HashMap::new()),
        })
    }

    /// All known batches across `corpora`, sorted ascending by
    /// `approximate_row_count` (the order the Batch Selector expects).
    pub fn batches_for(&self, corpora: &[i64]) -> Vec<Batch> {
        let registry = match self.corpus_batches.read() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("corpus_batches lock poisoned: {e}");
                return Vec::new();
            }
        };
        let mut batches: Vec<Batch> = corpora.iter().filter_map(|id| registry.get(id)).flatten().cloned().collect();
        batches.sort();
        batches
    }

    /// Re-fetches the corpus-config cache (spec.md §6 `POST /config`). The
    /// DB executor and SQL generator decide what "config" means; the engine
    /// only stores whatever batch list they hand back.
    pub async fn refresh_corpus_config(&self) -> Result<(), crate::error::ApiError> {
        let rows = self
            .db_executor
            .execute("SELECT corpus_id, schema_name, batch_name, approximate_row_count FROM corpus_config", &[], false)
            .await
            .map_err(|e| crate::error::ApiError::Internal(e.to_string()))?;

        let mut by_corpus: HashMap<i64, Vec<Batch>> = HashMap::new();
        for row in rows {
            let corpus_id = row.get("corpus_id").and_then(|v| v.as_i64());
            let schema_name = row.get("schema_name").and_then(|v| v.as_str());
            let batch_name = row.get("batch_name").and_then(|v| v.as_str());
            let approximate_row_count = row.get("approximate_row_count").and_then(|v| v.as_u64());
            if let (Some(corpus_id), Some(schema_name), Some(batch_name), Some(rows)) =
                (corpus_id, schema_name, batch_name, approximate_row_count)
            {
                by_corpus.entry(corpus_id).or_default().push(Batch::new(corpus_id, schema_name, batch_name, rows));
            }
        }

        match self.corpus_batches.write() {
            Ok(mut guard) => *guard = by_corpus,
            Err(e) => tracing::error!("corpus_batches lock poisoned refreshing: {e}"),
        }
        Ok(())
    }

    /// Wires every adapter to its in-process stand-in: `InMemoryCache`,
    /// `LocalChannel`, `TokioWorkerRuntime`, `StubSqlGenerator`,
    /// `NoopPrefilter`, `StubDbExecutor`, `NoopExportWriter`. What `main`
    /// uses until a real SQL generator/DB pool/export pipeline is configured.
    pub fn with_defaults(config: EngineConfig) -> Arc<Self> {
        Self::new(
            config,
            Arc::new(InMemoryCache::new()),
            Arc::new(LocalChannel::default()),
            Arc::new(TokioWorkerRuntime::new()),
            Arc::new(StubSqlGenerator),
            Arc::new(NoopPrefilter),
            Arc::new(StubDbExecutor),
            Arc::new(NoopExportWriter),
        )
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Registers a connection under `room`, returning its id so the caller
    /// can deregister it on disconnect.
    pub fn register_connection(&self, room: &str, user: &str, tx: mpsc::UnboundedSender<String>) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let handle = ConnectionHandle { id, user: user.to_string(), tx };
        match self.connections.write() {
            Ok(mut rooms) => rooms.entry(room.to_string()).or_default().push(handle),
            Err(e) => tracing::error!("connections lock poisoned registering: {e}"),
        }
        id
    }

    pub fn deregister_connection(&self, room: &str, id: ConnectionId) {
        match self.connections.write() {
            Ok(mut rooms) => {
                if let Some(handles) = rooms.get_mut(room) {
                    handles.retain(|h| h.id != id);
                    if handles.is_empty() {
                        rooms.remove(room);
                    }
                }
            }
            Err(e) => tracing::error!("connections lock poisoned deregistering: {e}"),
        }
    }

    /// Drops any connection whose transport has closed (spec.md §4.7
    /// "secondary task sweeps the client-connection table periodically").
    pub fn sweep_closed_connections(&self) {
        match self.connections.write() {
            Ok(mut rooms) => {
                rooms.retain(|_, handles| {
                    handles.retain(|h| !h.tx.is_closed());
                    !handles.is_empty()
                });
            }
            Err(e) => tracing::error!("connections lock poisoned sweeping: {e}"),
        }
    }
}
