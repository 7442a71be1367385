//! Redis backend over a bounded `deadpool` connection pool.

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use std::time::Duration;
use tracing::debug;

use super::{BackendError, KvBackend};
use crate::config::BackendConfig;

/// Secrets live in Redis, which enforces expiry and transaction isolation.
///
/// Every operation checks a connection out of the pool; the connection goes
/// back to the pool when it is dropped, on success and failure alike.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Create the pool. No connection is opened until the first request.
    pub fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut pool_config = PoolConfig::new(config.max_connections);
        pool_config.timeouts.wait = Some(config.wait_timeout());
        pool_config.timeouts.create = Some(config.wait_timeout());
        pool_config.timeouts.recycle = Some(config.wait_timeout());

        let mut cfg = Config::from_url(config.redis_url.clone());
        cfg.pool = Some(pool_config);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<Connection, BackendError> {
        Ok(self.pool.get().await?)
    }

    /// Round-trip a PING to verify the server is reachable.
    pub async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        let mut conn = self.conn().await?;
        // SET .. NX answers OK when created and nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.conn().await?;
        // MULTI / GET / DEL / EXEC
        let (value, deleted): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .get(key)
            .del(key)
            .query_async(&mut conn)
            .await?;
        debug!("Transaction removed {} key(s)", deleted);
        Ok(value)
    }

    async fn incr(&self, key: &str) -> Result<i64, BackendError> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<i64, BackendError> {
        let mut conn = self.conn().await?;
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}
