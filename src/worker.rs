use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::broker::{SubmissionConsumer, UpdatePublisher};
use crate::classifier::Classifier;
use crate::error::{StoreError, WorkerError};
use crate::models::{ModerationUpdate, Submission, Verdict};
use crate::store::Store;

/// Consumes submissions and produces verdicts, in this order per message:
/// classify, persist, publish the fan-out event, acknowledge.
///
/// Persisting before acknowledging means a crash in between causes
/// redelivery and a repeated classify+persist attempt; the store's upsert
/// absorbs that. Publishing before acknowledging can duplicate a broadcast,
/// which observer-side reconciliation absorbs.
#[derive(Clone)]
pub struct ModerationWorker {
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn Store>,
    updates: Arc<dyn UpdatePublisher>,
    classify_timeout: Duration,
    persist_timeout: Duration,
}

impl ModerationWorker {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn Store>,
        updates: Arc<dyn UpdatePublisher>,
        classify_timeout: Duration,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            store,
            updates,
            classify_timeout,
            persist_timeout,
        }
    }

    /// Consume deliveries until the task is aborted.
    pub async fn run(&self, mut consumer: Box<dyn SubmissionConsumer>) {
        loop {
            let delivery = match consumer.next().await {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(error = %e, "failed to read from submission stream");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            match serde_json::from_slice::<Submission>(&delivery.payload) {
                Ok(submission) => match self.handle(&submission).await {
                    Ok(update) => {
                        info!(
                            submission_id = %update.submission_id,
                            status = update.status.as_str(),
                            "submission moderated"
                        );
                        metrics::counter!("submissions_processed_total", 1);
                        if let Err(e) = consumer.ack(&delivery.id).await {
                            error!(delivery_id = %delivery.id, error = %e, "failed to ack delivery");
                        }
                    }
                    Err(e) => {
                        // Leave unacked: the broker redelivers and the
                        // idempotent upsert makes the retry safe.
                        error!(
                            submission_id = %submission.id,
                            error = %e,
                            "processing failed, leaving delivery for redelivery"
                        );
                        metrics::counter!("submissions_retried_total", 1);
                    }
                },
                Err(e) => {
                    // TODO: route undecodable payloads to a dead-letter
                    // stream instead of dropping them.
                    warn!(delivery_id = %delivery.id, error = %e, "dropping undecodable payload");
                    let _ = consumer.ack(&delivery.id).await;
                }
            }
        }
    }

    /// Process one submission: classify, persist, publish.
    ///
    /// Returns the fan-out event actually broadcast, built from the stored
    /// record so redeliveries re-announce the original verdict.
    pub async fn handle(&self, submission: &Submission) -> Result<ModerationUpdate, WorkerError> {
        let verdict = self.classify_with_policy(&submission.content).await;

        let record = match timeout(
            self.persist_timeout,
            self.store.upsert(submission, &verdict),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(WorkerError::Persistence(StoreError::Unavailable(
                    "store call timed out".to_string(),
                )))
            }
        };

        let update = ModerationUpdate::from_record(&record);
        if let Err(e) = self.updates.publish(&update).await {
            // Best-effort channel: observers that miss this event reconcile
            // from stored history on their next load.
            warn!(submission_id = %update.submission_id, error = %e, "fan-out publish failed");
        }

        Ok(update)
    }

    /// Classify under the fail-closed policy: an error, timeout, or
    /// malformed reply becomes a FLAGGED verdict with zero confidence,
    /// never a silent approval and never a dropped message.
    async fn classify_with_policy(&self, content: &str) -> Verdict {
        match timeout(self.classify_timeout, self.classifier.classify(content)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(error = %e, "classifier call failed, failing closed");
                metrics::counter!("classifications_failed_closed_total", 1);
                Verdict::unavailable()
            }
            Err(_) => {
                warn!(
                    budget_secs = self.classify_timeout.as_secs(),
                    "classifier call timed out, failing closed"
                );
                metrics::counter!("classifications_failed_closed_total", 1);
                Verdict::unavailable()
            }
        }
    }
}
