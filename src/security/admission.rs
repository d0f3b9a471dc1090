use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::redis_client::RedisClient;

/// Window size for the admission counter.
pub const WINDOW_SECONDS: u64 = 60;
/// Admissions allowed per identity per window.
pub const MAX_ADMISSIONS_PER_WINDOW: i64 = 10;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store error: {0}")]
    Store(String),
}

/// Increment-with-expiry contract of the external counter store. The guard
/// holds no state of its own, only a handle to this store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(&self, key: &str) -> Result<i64, CounterError>;
    async fn expire(&self, key: &str, seconds: i64) -> Result<(), CounterError>;
}

#[async_trait]
impl CounterStore for RedisClient {
    async fn increment(&self, key: &str) -> Result<i64, CounterError> {
        self.incr(key)
            .await
            .map_err(|e| CounterError::Store(e.to_string()))
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), CounterError> {
        RedisClient::expire(self, key, seconds)
            .await
            .map(|_| ())
            .map_err(|e| CounterError::Store(e.to_string()))
    }
}

/// Fixed-window admission throttle in front of ingestion.
///
/// Counts admissions per `(identity, window)` bucket; the first increment in
/// a bucket starts its expiry. This deliberately admits bursts of up to 2×
/// the limit across a window boundary - the coarse window is the accepted
/// trade-off, not a sliding window approximation.
#[derive(Clone)]
pub struct AdmissionGuard {
    store: Arc<dyn CounterStore>,
    window_seconds: u64,
    max_per_window: i64,
}

impl AdmissionGuard {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            window_seconds: WINDOW_SECONDS,
            max_per_window: MAX_ADMISSIONS_PER_WINDOW,
        }
    }

    /// Whether this identity may submit right now.
    ///
    /// Fail-open: if the counter store is unreachable the request is
    /// admitted and the degradation logged - availability over strict
    /// enforcement.
    pub async fn allow(&self, identity: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.allow_in_window(identity, now / self.window_seconds)
            .await
    }

    async fn allow_in_window(&self, identity: &str, bucket: u64) -> bool {
        let key = format!("rate_limit:{}:{}", identity, bucket);

        let count = match self.store.increment(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(identity, error = %e, "admission counter unreachable, failing open");
                return true;
            }
        };

        if count == 1 {
            // A lost expiry only lengthens the window slightly; races on
            // first-increment-sets-expiry are tolerated the same way.
            if let Err(e) = self.store.expire(&key, self.window_seconds as i64).await {
                warn!(identity, error = %e, "failed to set admission window expiry");
            }
        }

        count <= self.max_per_window
    }
}

/// In-memory counter store for tests, honouring the same
/// increment-with-expiry contract as Redis.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, (i64, Option<Instant>)>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, to exercise the guard's fail-open policy.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), CounterError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            Err(CounterError::Store("counter store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64, CounterError> {
        self.check_available()?;
        let mut counters = self.counters.lock().await;
        let entry = counters.entry(key.to_string()).or_insert((0, None));
        if let Some(expires_at) = entry.1 {
            if Instant::now() >= expires_at {
                *entry = (0, None);
            }
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn expire(&self, key: &str, seconds: i64) -> Result<(), CounterError> {
        self.check_available()?;
        let mut counters = self.counters.lock().await;
        if let Some(entry) = counters.get_mut(key) {
            entry.1 = Some(Instant::now() + std::time::Duration::from_secs(seconds.max(0) as u64));
        }
        Ok(())
    }
}
