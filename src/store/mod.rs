//! Key-value backends holding the live secrets.
//!
//! The exchange never tracks entries itself. Everything that must be atomic
//! (claiming a fresh key, read-and-delete, expiry) is delegated to the
//! backend through [`KvBackend`].

pub mod memory;
pub mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failures of the backing store. Always transient from the caller's view.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Storage operations the exchange relies on.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Create `key` with `value` and a time-to-live, only if it does not
    /// exist yet. Returns `false` when the key is already taken.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, BackendError>;

    /// Read and delete `key` as one indivisible step.
    ///
    /// Of any number of concurrent callers at most one sees the value.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Increment a counter, creating it at zero first if needed.
    async fn incr(&self, key: &str) -> Result<i64, BackendError>;

    /// Current value of a counter, zero when it was never incremented.
    async fn counter(&self, key: &str) -> Result<i64, BackendError>;
}

/// Shared backend handle injected into the exchange.
pub type SharedBackend = Arc<dyn KvBackend>;
