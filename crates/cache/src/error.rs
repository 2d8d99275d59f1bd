//! Errors surfaced by the cache/pub-sub fabric.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("record not found for key {0}")]
    NotFound(String),

    #[error("cache lock poisoned: {0}")]
    Poisoned(String),

    #[error("failed to (de)serialize cache payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no subscribers reachable for channel {0}")]
    ChannelClosed(String),
}
