//! `JobRecord`: the cache's view of a worker-executed job (spec.md §3 "Job").

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal and non-terminal job states (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    Canceled,
    Stopped,
}

impl JobStatus {
    /// Finished, failed, canceled, and stopped are all terminal; only a
    /// terminal-`Finished` record is eligible for lease-by-lookup replay
    /// (spec.md §4.1).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Started)
    }
}

/// An opaque worker-executed unit, keyed by fingerprint (spec.md §3, §4.1).
///
/// `meta` carries the progress counters, associated-job ids, and
/// published-message ids the callback layer accumulates; the engine never
/// interprets its shape directly, only merges into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kwargs: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub meta: serde_json::Value,
    pub status: JobStatus,
    pub ttl: Duration,
}

impl JobRecord {
    pub fn queued(id: impl Into<String>, kwargs: serde_json::Value, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            kwargs,
            result: None,
            meta: serde_json::json!({}),
            status: JobStatus::Queued,
            ttl,
        }
    }

    /// The record a job's `on_success` hook writes back once it has a
    /// result, so a later request with the same fingerprint finds a
    /// replayable hit instead of another `Queued` placeholder (spec.md
    /// §4.1).
    pub fn finished(id: impl Into<String>, result: serde_json::Value, ttl: Duration) -> Self {
        Self {
            id: id.into(),
            kwargs: serde_json::Value::Null,
            result: Some(result),
            meta: serde_json::json!({}),
            status: JobStatus::Finished,
            ttl,
        }
    }

    pub fn is_replayable(&self) -> bool {
        self.status == JobStatus::Finished
    }
}
