//! DB executor adapter (spec.md §4.8): a single asynchronous call that
//! opens a connection from a pool, executes, returns all rows, and closes.
//! Grounded on `backend/jobfuncs.py`'s `_db_query` (pool-per-call, a
//! `single`/`single_row` flag selecting `fetchone` vs `fetchall`).

use async_trait::async_trait;
use corpusq_core::Row;

use super::AdapterError;

pub type DbRow = Row;

#[async_trait]
pub trait DbExecutor: Send + Sync {
    /// Executes `sql` with `params`, returning every row. When `single_row`
    /// is set, at most one row is returned (mirrors the original's
    /// `fetchone` path used for config/count queries).
    async fn execute(
        &self,
        sql: &str,
        params: &[serde_json::Value],
        single_row: bool,
    ) -> Result<Vec<DbRow>, AdapterError>;
}

/// In-memory stand-in used until a real connection pool (sqlx/tokio-postgres)
/// is wired in. Never touches a network; always returns an empty row set,
/// which is enough for the engine's own tests (aggregation over zero rows
/// is a well-defined, tested case).
#[derive(Debug, Default)]
pub struct StubDbExecutor;

#[async_trait]
impl DbExecutor for StubDbExecutor {
    async fn execute(
        &self,
        sql: &str,
        _params: &[serde_json::Value],
        _single_row: bool,
    ) -> Result<Vec<DbRow>, AdapterError> {
        if sql.trim().is_empty() {
            return Err(AdapterError::DbExecution("empty sql text".into()));
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_rejects_empty_sql() {
        let executor = StubDbExecutor;
        let result = executor.execute("", &[], false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stub_returns_no_rows_for_any_query() {
        let executor = StubDbExecutor;
        let rows = executor.execute("SELECT 1", &[], false).await.unwrap();
        assert!(rows.is_empty());
    }
}
