use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use crate::broker::{RedisQueue, SubmissionQueue};
use crate::metrics::MetricsTracker;
use crate::models::ModerationUpdate;
use crate::redis_client::RedisClient;
use crate::security::AdmissionGuard;

/// How many fan-out events a slow observer may fall behind before it starts
/// skipping.
const UPDATE_BUFFER: usize = 256;

#[derive(Clone)]
pub struct AppState {
    pub redis: RedisClient,
    pub queue: Arc<dyn SubmissionQueue>,
    pub guard: AdmissionGuard,
    pub updates: broadcast::Sender<ModerationUpdate>,
    pub metrics: MetricsTracker,
}

impl AppState {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let redis = RedisClient::new(redis_url).await?;
        let queue: Arc<dyn SubmissionQueue> = Arc::new(RedisQueue::new(redis.clone()));
        let guard = AdmissionGuard::new(Arc::new(redis.clone()));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);

        Ok(Self {
            redis,
            queue,
            guard,
            updates,
            metrics: MetricsTracker::new(),
        })
    }
}
