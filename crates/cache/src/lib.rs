//! The shared cache/pub-sub fabric (spec.md §4.1, §4.7): job registry,
//! replay-message store, and connection-fan-out channel. Ships an
//! in-process implementation; the traits are the seam a real Redis-backed
//! deployment would implement against.

pub mod error;
pub mod memory;
pub mod pubsub;
pub mod record;

use std::time::Duration;

use async_trait::async_trait;

pub use error::CacheError;
pub use memory::InMemoryCache;
pub use pubsub::{Envelope, LocalChannel};
pub use record::{JobRecord, JobStatus};

/// The job registry and replay-message store (spec.md §4.1).
///
/// `put_job`/`get_job` back lease-by-lookup: a cache hit on a
/// terminal-finished record means the caller replays instead of
/// resubmitting. `put_message`/`get_message` back `send_all_data`
/// (spec.md §4.5): the last published envelope for a job, kept around so a
/// later cache-hit pagination call can re-publish it verbatim.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, CacheError>;

    async fn put_job(&self, record: JobRecord) -> Result<(), CacheError>;

    /// Refresh TTL on a hit (spec.md §4.1: "TTL on every cache entry is
    /// refreshed on each hit to keep hot queries warm").
    async fn refresh_ttl(&self, id: &str) -> Result<(), CacheError>;

    async fn remove_job(&self, id: &str) -> Result<(), CacheError>;

    async fn get_message(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;

    async fn put_message(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;
}

/// The publish side of the shared channel (spec.md §4.7). Subscription is
/// implementation-specific (see [`LocalChannel::subscribe`]) since it
/// returns a concrete receiver type, not a trait object.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), CacheError>;
}
