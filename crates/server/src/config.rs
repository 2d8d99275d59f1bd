//! Engine configuration, read from the environment (spec.md §6).

use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// All engine-wide knobs, read once at startup. Timeouts are milliseconds
/// unless noted, matching the original environment's units.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default per-job timeout for quota-bounded queries.
    pub query_timeout: Duration,
    /// Timeout for full-corpus (`full_flag` or `needed == -1`) queries.
    pub entire_corpus_timeout: Duration,
    /// Timeout the worker runtime allows a callback handler to run.
    pub callback_timeout: Duration,
    pub upload_timeout: Duration,
    /// TTL applied to cache entries (job records and replay messages).
    pub query_ttl: Duration,
    /// Master switch for lease-by-lookup cache replay (spec.md §4.1).
    pub use_cache: bool,
    /// Accepted and stored, but ignored by the in-process cache.
    pub redis_url: Option<String>,
    pub redis_db_index: u64,
    pub port: u16,
    /// Hard cap on KWIC lines hydrated per iteration.
    pub default_max_kwic_lines: u64,
    pub debug: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            query_timeout: Duration::from_millis(env_u64("QUERY_TIMEOUT", 1000)),
            entire_corpus_timeout: Duration::from_millis(env_u64(
                "QUERY_ENTIRE_CORPUS_CALLBACK_TIMEOUT",
                99_999,
            )),
            callback_timeout: Duration::from_millis(env_u64("QUERY_CALLBACK_TIMEOUT", 5000)),
            upload_timeout: Duration::from_secs(env_u64("UPLOAD_TIMEOUT", 43_200)),
            query_ttl: Duration::from_millis(env_u64("QUERY_TTL", 5000)),
            use_cache: env_bool("USE_CACHE", true),
            redis_url: std::env::var("REDIS_URL").ok(),
            redis_db_index: env_u64("REDIS_DB_INDEX", 0),
            port: env_u64("AIO_PORT", 9090) as u16,
            default_max_kwic_lines: env_u64("DEFAULT_MAX_KWIC_LINES", 9999),
            debug: env_bool("DEBUG", false),
        }
    }

    /// Timeout to use for one iteration's primary job, given its mode.
    pub fn primary_timeout(&self, full_corpus: bool) -> Duration {
        if full_corpus {
            self.entire_corpus_timeout
        } else {
            self.query_timeout
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
