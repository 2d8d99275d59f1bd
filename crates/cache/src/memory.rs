//! In-process `Cache` implementation. Stands in for the real Redis-backed
//! registry (out of scope, spec.md §1); `REDIS_URL`/`REDIS_DB_INDEX` are
//! accepted by configuration and ignored here.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CacheError;
use crate::record::JobRecord;
use crate::Cache;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// A TTL-aware in-memory key/value store, locked behind a single
/// `RwLock<HashMap<..>>` per table. Fine for a single process; a real
/// deployment swaps this for a Redis-backed implementation of [`Cache`]
/// without touching the engine.
pub struct InMemoryCache {
    jobs: RwLock<HashMap<String, Entry<JobRecord>>>,
    messages: RwLock<HashMap<String, Entry<serde_json::Value>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_job(&self, id: &str) -> Result<Option<JobRecord>, CacheError> {
        let jobs = self.jobs.read().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        Ok(match jobs.get(id) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            _ => None,
        })
    }

    async fn put_job(&self, record: JobRecord) -> Result<(), CacheError> {
        let ttl = record.ttl;
        let mut jobs = self.jobs.write().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        jobs.insert(record.id.clone(), Entry::new(record, ttl));
        Ok(())
    }

    async fn refresh_ttl(&self, id: &str) -> Result<(), CacheError> {
        let mut jobs = self.jobs.write().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        match jobs.get_mut(id) {
            Some(entry) => {
                let ttl = entry.value.ttl;
                entry.expires_at = Instant::now() + ttl;
                Ok(())
            }
            None => Err(CacheError::NotFound(id.to_string())),
        }
    }

    async fn remove_job(&self, id: &str) -> Result<(), CacheError> {
        let mut jobs = self.jobs.write().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        jobs.remove(id);
        Ok(())
    }

    async fn get_message(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let messages = self.messages.read().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        Ok(match messages.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.value.clone()),
            _ => None,
        })
    }

    async fn put_message(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut messages = self.messages.write().map_err(|e| CacheError::Poisoned(e.to_string()))?;
        messages.insert(key.to_string(), Entry::new(value, ttl));
        Ok(())
    }
}
