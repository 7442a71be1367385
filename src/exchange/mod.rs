//! The one-time secret exchange.
//!
//! Two operations make up the engine:
//!
//! - [`SecretExchange::allocate`] draws a random mnemonic and claims it in
//!   the backend with a conditional create, retrying a bounded number of
//!   times on collision.
//! - [`SecretExchange::exchange`] reads and deletes the entry in a single
//!   backend transaction, so a secret is handed out at most once.
//!
//! The engine keeps no mutable state of its own. It can be cloned freely
//! into any number of concurrent request handlers.

pub mod mnemonic;
pub mod record;
pub mod stats;

pub use mnemonic::{redact, Mnemonic, MnemonicSource, RandomMnemonics, ALPHABET};
pub use record::SecretRecord;
pub use stats::{ExchangeStats, StatEvent, StatsSnapshot};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ExchangeConfig;
use crate::store::{BackendError, SharedBackend};

/// Why an allocation or exchange did not complete.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("could not encode secret: {0}")]
    Encode(#[source] serde_json::Error),

    /// A value exists under the mnemonic but is not a secret record.
    #[error("stored secret is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("no free mnemonic after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Lifetime and mnemonic shape for newly stored secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePolicy {
    pub lifetime: Duration,
    pub mnemonic_len: usize,
    pub max_attempts: u32,
}

impl Default for ExchangePolicy {
    fn default() -> Self {
        Self::from(&ExchangeConfig::default())
    }
}

impl From<&ExchangeConfig> for ExchangePolicy {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            lifetime: config.lifetime(),
            mnemonic_len: config.mnemonic_len,
            max_attempts: config.max_attempts,
        }
    }
}

/// Handle to the exchange engine
#[derive(Clone)]
pub struct SecretExchange {
    backend: SharedBackend,
    mnemonics: Arc<dyn MnemonicSource>,
    policy: ExchangePolicy,
    stats: ExchangeStats,
}

impl SecretExchange {
    pub fn new(backend: SharedBackend, policy: ExchangePolicy) -> Self {
        Self {
            stats: ExchangeStats::new(backend.clone()),
            mnemonics: Arc::new(RandomMnemonics::new(policy.mnemonic_len)),
            backend,
            policy,
        }
    }

    /// Replace the random mnemonic generator
    pub fn with_mnemonics(mut self, mnemonics: Arc<dyn MnemonicSource>) -> Self {
        self.mnemonics = mnemonics;
        self
    }

    pub fn stats(&self) -> &ExchangeStats {
        &self.stats
    }

    /// Store `record` under a fresh mnemonic and return it.
    ///
    /// Fails with [`ExchangeError::Exhausted`] when every candidate collided
    /// with a live entry. Resubmitting is always safe: each call draws new
    /// candidates.
    pub async fn allocate(&self, record: &SecretRecord) -> Result<Mnemonic, ExchangeError> {
        let payload = serde_json::to_vec(record).map_err(ExchangeError::Encode)?;

        for attempt in 1..=self.policy.max_attempts {
            let mnemonic = self.mnemonics.next_mnemonic();
            let created = self
                .backend
                .set_if_absent(mnemonic.as_str(), &payload, self.policy.lifetime)
                .await?;

            if created {
                info!("Stored secret under {}…", mnemonic.redacted());
                self.stats.record(StatEvent::Stored).await;
                return Ok(mnemonic);
            }
            warn!(
                "Mnemonic collision on attempt {}/{}",
                attempt, self.policy.max_attempts
            );
        }

        error!(
            "Giving up after {} mnemonic collisions",
            self.policy.max_attempts
        );
        Err(ExchangeError::Exhausted {
            attempts: self.policy.max_attempts,
        })
    }

    /// Hand out the secret stored under the mnemonic `handle` and delete it.
    ///
    /// `Ok(None)` means there is nothing to hand out: the mnemonic never
    /// existed, was already exchanged, or expired.
    pub async fn exchange(&self, handle: &str) -> Result<Option<SecretRecord>, ExchangeError> {
        let Some(mnemonic) = Mnemonic::parse(handle, self.policy.mnemonic_len) else {
            debug!("Rejecting malformed mnemonic {}…", redact(handle));
            return Ok(None);
        };

        let Some(payload) = self.backend.take(mnemonic.as_str()).await? else {
            debug!("No secret under {}…", mnemonic.redacted());
            return Ok(None);
        };

        match serde_json::from_slice::<SecretRecord>(&payload) {
            Ok(record) => {
                info!("Handed out secret {}…", mnemonic.redacted());
                self.stats.record(StatEvent::Retrieved).await;
                Ok(Some(record))
            }
            Err(e) => {
                error!(
                    "Discarding undecodable secret under {}…: {}",
                    mnemonic.redacted(),
                    e
                );
                Err(ExchangeError::Corrupt(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KvBackend, MemoryBackend};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Hands out a fixed sequence, then repeats the last one
    struct ScriptedMnemonics {
        script: Mutex<VecDeque<&'static str>>,
        last: &'static str,
    }

    impl ScriptedMnemonics {
        fn new(script: &[&'static str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: script[script.len() - 1],
            })
        }
    }

    impl MnemonicSource for ScriptedMnemonics {
        fn next_mnemonic(&self) -> Mnemonic {
            let next = self.script.lock().unwrap().pop_front().unwrap_or(self.last);
            Mnemonic::parse(next, 10).unwrap()
        }
    }

    /// Memory backend whose counters are broken
    struct BrokenCounters(MemoryBackend);

    #[async_trait]
    impl KvBackend for BrokenCounters {
        async fn set_if_absent(
            &self,
            key: &str,
            value: &[u8],
            ttl: Duration,
        ) -> Result<bool, BackendError> {
            self.0.set_if_absent(key, value, ttl).await
        }

        async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
            self.0.take(key).await
        }

        async fn incr(&self, _key: &str) -> Result<i64, BackendError> {
            Err(BackendError::Unavailable("counter store down".into()))
        }

        async fn counter(&self, _key: &str) -> Result<i64, BackendError> {
            Err(BackendError::Unavailable("counter store down".into()))
        }
    }

    /// Backend that is unreachable for every operation
    struct Offline;

    #[async_trait]
    impl KvBackend for Offline {
        async fn set_if_absent(
            &self,
            _: &str,
            _: &[u8],
            _: Duration,
        ) -> Result<bool, BackendError> {
            Err(BackendError::Unavailable("offline".into()))
        }

        async fn take(&self, _: &str) -> Result<Option<Vec<u8>>, BackendError> {
            Err(BackendError::Unavailable("offline".into()))
        }

        async fn incr(&self, _: &str) -> Result<i64, BackendError> {
            Err(BackendError::Unavailable("offline".into()))
        }

        async fn counter(&self, _: &str) -> Result<i64, BackendError> {
            Err(BackendError::Unavailable("offline".into()))
        }
    }

    fn memory_exchange() -> (Arc<MemoryBackend>, SecretExchange) {
        let backend = Arc::new(MemoryBackend::new());
        let exchange = SecretExchange::new(backend.clone(), ExchangePolicy::default());
        (backend, exchange)
    }

    #[tokio::test]
    async fn test_store_then_exchange_once() {
        let (_, exchange) = memory_exchange();
        let record = SecretRecord::new("k1", "n1", "s1");

        let mnemonic = exchange.allocate(&record).await.unwrap();
        assert_eq!(mnemonic.as_str().len(), 10);
        assert!(mnemonic.as_str().bytes().all(|b| ALPHABET.contains(&b)));

        let retrieved = exchange.exchange(mnemonic.as_str()).await.unwrap();
        assert_eq!(retrieved, Some(record));

        let again = exchange.exchange(mnemonic.as_str()).await.unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn test_unknown_mnemonic_is_absent() {
        let (_, exchange) = memory_exchange();
        assert_eq!(exchange.exchange("AAAAAAAAAA").await.unwrap(), None);
        assert_eq!(exchange.exchange("not a mnemonic").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_malformed_mnemonic_never_reaches_backend() {
        let (backend, exchange) = memory_exchange();
        exchange.stats().record(StatEvent::Stored).await;
        assert_eq!(exchange.exchange(stats::STORED_KEY).await.unwrap(), None);
        assert_eq!(backend.counter(stats::STORED_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_secret_is_absent() {
        let backend = Arc::new(MemoryBackend::new());
        let policy = ExchangePolicy {
            lifetime: Duration::from_millis(20),
            ..ExchangePolicy::default()
        };
        let exchange = SecretExchange::new(backend, policy);

        let mnemonic = exchange
            .allocate(&SecretRecord::new("k", "n", "s"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(exchange.exchange(mnemonic.as_str()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unbounded_lifetime_on_memory_backend() {
        let policy = ExchangePolicy {
            lifetime: Duration::from_secs(u64::MAX),
            ..ExchangePolicy::default()
        };
        let exchange = SecretExchange::new(Arc::new(MemoryBackend::new()), policy);
        let record = SecretRecord::new("k", "n", "s");

        let mnemonic = exchange.allocate(&record).await.unwrap();
        assert_eq!(exchange.exchange(mnemonic.as_str()).await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_collision_retries_with_fresh_mnemonic() {
        let (_, exchange) = memory_exchange();
        let exchange = exchange.with_mnemonics(ScriptedMnemonics::new(&[
            "AAAAAAAAAA",
            "AAAAAAAAAA",
            "AAAAAAAAAA",
            "BBBBBBBBBB",
        ]));

        let first = exchange
            .allocate(&SecretRecord::new("k1", "n1", "s1"))
            .await
            .unwrap();
        let second = exchange
            .allocate(&SecretRecord::new("k2", "n2", "s2"))
            .await
            .unwrap();

        assert_eq!(first.as_str(), "AAAAAAAAAA");
        assert_eq!(second.as_str(), "BBBBBBBBBB");
        assert_eq!(
            exchange.exchange("AAAAAAAAAA").await.unwrap(),
            Some(SecretRecord::new("k1", "n1", "s1"))
        );
        assert_eq!(
            exchange.exchange("BBBBBBBBBB").await.unwrap(),
            Some(SecretRecord::new("k2", "n2", "s2"))
        );
    }

    #[tokio::test]
    async fn test_collision_exhaustion() {
        let (_, exchange) = memory_exchange();
        let exchange = exchange.with_mnemonics(ScriptedMnemonics::new(&["CCCCCCCCCC"]));

        exchange
            .allocate(&SecretRecord::new("k", "n", "s"))
            .await
            .unwrap();
        let err = exchange
            .allocate(&SecretRecord::new("k", "n", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Exhausted { attempts: 10 }));

        // the live entry was not overwritten
        assert_eq!(
            exchange.exchange("CCCCCCCCCC").await.unwrap(),
            Some(SecretRecord::new("k", "n", "s"))
        );
    }

    #[tokio::test]
    async fn test_corrupt_value_is_an_error_and_removed() {
        let (backend, exchange) = memory_exchange();
        backend.insert_raw("DDDDDDDDDD", b"not json", Duration::from_secs(60));

        let err = exchange.exchange("DDDDDDDDDD").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Corrupt(_)));
        assert_eq!(exchange.exchange("DDDDDDDDDD").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backend_failure_is_an_error() {
        let exchange = SecretExchange::new(Arc::new(Offline), ExchangePolicy::default());

        let err = exchange
            .allocate(&SecretRecord::new("k", "n", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Backend(_)));

        let err = exchange.exchange("AAAAAAAAAA").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Backend(_)));
    }

    #[tokio::test]
    async fn test_counters_follow_operations() {
        let (_, exchange) = memory_exchange();
        let mnemonic = exchange
            .allocate(&SecretRecord::new("k", "n", "s"))
            .await
            .unwrap();
        exchange.allocate(&SecretRecord::new("k", "n", "s")).await.unwrap();
        exchange.exchange(mnemonic.as_str()).await.unwrap();
        exchange.exchange(mnemonic.as_str()).await.unwrap();

        let snapshot = exchange.stats().snapshot().await.unwrap();
        assert_eq!(snapshot, StatsSnapshot { stored: 2, retrieved: 1 });
    }

    #[tokio::test]
    async fn test_broken_counters_do_not_fail_operations() {
        let backend = Arc::new(BrokenCounters(MemoryBackend::new()));
        let exchange = SecretExchange::new(backend, ExchangePolicy::default());
        let record = SecretRecord::new("k", "n", "s");

        let mnemonic = exchange.allocate(&record).await.unwrap();
        assert_eq!(exchange.exchange(mnemonic.as_str()).await.unwrap(), Some(record));
        assert!(exchange.stats().snapshot().await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_exchange_hands_out_once() {
        let (_, exchange) = memory_exchange();
        let record = SecretRecord::new("k", "n", "s");
        let mnemonic = exchange.allocate(&record).await.unwrap();

        let a = tokio::spawn({
            let exchange = exchange.clone();
            let mnemonic = mnemonic.clone();
            async move { exchange.exchange(mnemonic.as_str()).await.unwrap() }
        });
        let b = tokio::spawn({
            let exchange = exchange.clone();
            let mnemonic = mnemonic.clone();
            async move { exchange.exchange(mnemonic.as_str()).await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert_eq!(a.or(b), Some(record));
    }
}
