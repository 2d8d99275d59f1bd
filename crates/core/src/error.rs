//! Leaf errors raised by the pure core algorithms.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("row is not shaped as an array: {0}")]
    MalformedRow(serde_json::Value),

    #[error("no sentence row found matching segment id in {0}")]
    SentenceNotFound(serde_json::Value),

    #[error("descriptor row (index 0) is malformed: {0}")]
    MalformedDescriptor(serde_json::Value),
}
