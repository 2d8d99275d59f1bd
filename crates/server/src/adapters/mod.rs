//! External-interface adapters (spec.md §4.8). The engine treats the SQL
//! generator, prefilter, and DB executor as opaque collaborators behind
//! narrow traits — it does not parse query DSLs or speak SQL beyond
//! substituting batch names and id-lists into their output. The worker
//! runtime is the one adapter the engine actually drives: it schedules and
//! tracks jobs, so it gets a fuller in-process implementation.

pub mod db_executor;
pub mod export_writer;
pub mod prefilter;
pub mod sql_generator;
pub mod worker_runtime;

pub use db_executor::{DbExecutor, DbRow, StubDbExecutor};
pub use export_writer::{ExportRequest, ExportWriter, NoopExportWriter};
pub use prefilter::{finalise_prefilters, NoopPrefilter, Prefilter};
pub use sql_generator::{GeneratedSql, SqlGenerator, StubSqlGenerator};
pub use worker_runtime::{EnqueueRequest, Job, TokioWorkerRuntime, WorkerRuntime};

use thiserror::Error;

/// Leaf errors raised by the external-interface adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("sql generation failed: {0}")]
    SqlGeneration(String),

    #[error("db execution failed: {0}")]
    DbExecution(String),

    #[error("worker runtime lock poisoned: {0}")]
    Poisoned(String),

    #[error("no such job: {0}")]
    JobNotFound(String),

    #[error("job {0} timed out")]
    Timeout(String),

    #[error("job {0} depends on a job that never succeeded")]
    DependencyFailed(String),
}
