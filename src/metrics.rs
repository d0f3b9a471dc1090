use std::sync::Arc;
use tokio::sync::RwLock;

/// Tracks live pipeline counters for health and monitoring.
#[derive(Clone)]
pub struct MetricsTracker {
    active_connections: Arc<RwLock<i64>>,
    submissions_accepted: Arc<RwLock<u64>>,
    verdicts_relayed: Arc<RwLock<u64>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            active_connections: Arc::new(RwLock::new(0)),
            submissions_accepted: Arc::new(RwLock::new(0)),
            verdicts_relayed: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn increment_connections(&self) {
        let mut count = self.active_connections.write().await;
        *count += 1;
        metrics::gauge!("active_observer_connections", *count as f64);
    }

    pub async fn decrement_connections(&self) {
        let mut count = self.active_connections.write().await;
        *count -= 1;
        metrics::gauge!("active_observer_connections", *count as f64);
    }

    pub async fn increment_submissions(&self) {
        let mut count = self.submissions_accepted.write().await;
        *count += 1;
        metrics::counter!("submissions_accepted_total", 1);
    }

    pub async fn increment_verdicts(&self) {
        let mut count = self.verdicts_relayed.write().await;
        *count += 1;
        metrics::counter!("verdicts_relayed_total", 1);
    }

    pub async fn get_active_connections(&self) -> i64 {
        *self.active_connections.read().await
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
