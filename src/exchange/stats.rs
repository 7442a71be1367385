//! Best-effort usage counters kept next to the secrets.

use serde::Serialize;
use tracing::warn;

use crate::store::{BackendError, SharedBackend};

pub const STORED_KEY: &str = "keedrop:stats:stored";
pub const RETRIEVED_KEY: &str = "keedrop:stats:retrieved";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    Stored,
    Retrieved,
}

impl StatEvent {
    fn key(self) -> &'static str {
        match self {
            Self::Stored => STORED_KEY,
            Self::Retrieved => RETRIEVED_KEY,
        }
    }
}

/// Counter values as exposed on the stats endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub stored: i64,
    pub retrieved: i64,
}

/// Counter sink. Recording never fails the operation being counted.
#[derive(Clone)]
pub struct ExchangeStats {
    backend: SharedBackend,
}

impl ExchangeStats {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    pub async fn record(&self, event: StatEvent) {
        if let Err(e) = self.backend.incr(event.key()).await {
            warn!("Could not update {:?} counter: {}", event, e);
        }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot, BackendError> {
        Ok(StatsSnapshot {
            stored: self.backend.counter(STORED_KEY).await?,
            retrieved: self.backend.counter(RETRIEVED_KEY).await?,
        })
    }
}
