//! Export writer shim (spec.md §4.8, §6 `started_export`). The actual file
//! format and storage backend are entirely out of scope (spec.md §2
//! Non-goals list "the export file writers" among the external
//! collaborators); the engine only needs a narrow hand-off once a Logical
//! Query with an export intent goes `TERMINAL`, carrying the union of
//! sentence/metadata job ids gathered across every iteration.

use async_trait::async_trait;

use super::AdapterError;

/// What the Controller hands the export writer once a Logical Query with
/// an export intent reaches `TERMINAL` (spec.md §4.6 "export hand-off").
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub logical_query_id: String,
    pub to_export: String,
    pub sentence_job_ids: Vec<String>,
    pub metadata_job_ids: Vec<String>,
}

#[async_trait]
pub trait ExportWriter: Send + Sync {
    /// Schedules materialisation of the finished result set, returning the
    /// export job's id so it can be reported back to the client.
    async fn schedule_export(&self, request: ExportRequest) -> Result<String, AdapterError>;
}

/// Accepts every export request and hands back a deterministic id without
/// writing anything, the same role `StubDbExecutor`/`StubSqlGenerator` play
/// for their adapters.
pub struct NoopExportWriter;

#[async_trait]
impl ExportWriter for NoopExportWriter {
    async fn schedule_export(&self, request: ExportRequest) -> Result<String, AdapterError> {
        Ok(format!("export:{}", request.logical_query_id))
    }
}
