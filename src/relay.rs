use futures::StreamExt;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::broker::UPDATES_CHANNEL;
use crate::metrics::MetricsTracker;
use crate::models::ModerationUpdate;
use crate::redis_client::RedisClient;

/// Relays verdict events from the fan-out channel to connected observers.
///
/// One pub/sub subscription lives for the whole process; every event is
/// forwarded into the broadcast channel that each websocket connection
/// listens on. Events published while no relay is subscribed are missed
/// permanently, which is acceptable: observers reconcile their own session
/// and load history separately.
pub struct NotificationRelay {
    redis: RedisClient,
    updates: broadcast::Sender<ModerationUpdate>,
    metrics: MetricsTracker,
}

impl NotificationRelay {
    pub fn new(
        redis: RedisClient,
        updates: broadcast::Sender<ModerationUpdate>,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            redis,
            updates,
            metrics,
        }
    }

    /// Run the relay, resubscribing if the pub/sub connection drops.
    pub async fn run(self) {
        loop {
            if let Err(e) = self.subscribe_loop().await {
                error!(error = %e, "relay subscription lost, reconnecting");
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }

    async fn subscribe_loop(&self) -> Result<(), redis::RedisError> {
        let conn = self.redis.get_client().get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(UPDATES_CHANNEL).await?;
        info!(channel = UPDATES_CHANNEL, "notification relay subscribed");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to read fan-out payload");
                    continue;
                }
            };

            match serde_json::from_str::<ModerationUpdate>(&payload) {
                Ok(update) => {
                    self.metrics.increment_verdicts().await;
                    // Send fails only when no observer is connected; the
                    // channel has no delivery guarantee anyway.
                    let _ = self.updates.send(update);
                }
                Err(e) => {
                    warn!(error = %e, "discarding malformed fan-out event");
                }
            }
        }

        Ok(())
    }
}
