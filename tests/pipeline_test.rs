//! End-to-end pipeline tests over the in-memory broker, store, and fan-out
//! fakes: validate+enqueue, consume+classify+persist+publish, and
//! observer-side reconciliation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use sift_server::broker::{
    MemoryQueue, MemoryUpdatePublisher, SubmissionQueue, MODERATION_GROUP,
};
use sift_server::classifier::Classifier;
use sift_server::error::ClassifierError;
use sift_server::feed::{FeedEntry, ModerationFeed};
use sift_server::models::{SubmitRequest, Submission, Verdict, VerdictStatus};
use sift_server::store::{MemoryStore, Store};
use sift_server::worker::ModerationWorker;

/// Stand-in for the opaque safety classifier, scripted to match the
/// behavior the pipeline is tested against.
struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, content: &str) -> Result<Verdict, ClassifierError> {
        if content.to_lowercase().contains("hate") {
            Ok(Verdict {
                status: VerdictStatus::Flagged,
                confidence: 0.88,
                reason: Some("hate speech".to_string()),
            })
        } else {
            Ok(Verdict {
                status: VerdictStatus::Approved,
                confidence: 0.97,
                reason: None,
            })
        }
    }
}

fn make_worker(
    store: MemoryStore,
    publisher: MemoryUpdatePublisher,
) -> ModerationWorker {
    ModerationWorker::new(
        Arc::new(KeywordClassifier),
        Arc::new(store),
        Arc::new(publisher),
        Duration::from_millis(500),
        Duration::from_millis(500),
    )
}

fn submit_request(content: &str) -> SubmitRequest {
    SubmitRequest {
        user_id: Uuid::new_v4().to_string(),
        content: content.to_string(),
    }
}

#[tokio::test]
async fn friendly_submission_reaches_observer_as_approved() {
    let queue = MemoryQueue::new();
    let store = MemoryStore::new();
    let publisher = MemoryUpdatePublisher::new(16);
    let mut updates = publisher.subscribe();

    // Phase 1: validate and enqueue; the caller gets the id back at once.
    let submission = Submission::from_request(&submit_request("Have a nice day")).unwrap();
    queue
        .publish(&serde_json::to_vec(&submission).unwrap())
        .await
        .unwrap();

    // The observer shows a pending placeholder immediately.
    let mut feed = ModerationFeed::new(ChronoDuration::minutes(5));
    feed.submitted(submission.id, submission.content.clone());
    assert!(feed.entries()[0].is_pending());

    // Phase 2: the worker consumes, classifies, persists, publishes, acks.
    let worker = make_worker(store.clone(), publisher.clone());
    let mut consumer = queue.consumer(MODERATION_GROUP, "w0").await.unwrap();
    let delivery = consumer.next().await.unwrap();
    let consumed: Submission = serde_json::from_slice(&delivery.payload).unwrap();
    worker.handle(&consumed).await.unwrap();
    consumer.ack(&delivery.id).await.unwrap();

    // Exactly one record, with the approving verdict.
    let record = store.find(submission.id).await.unwrap().unwrap();
    assert_eq!(record.verdict.status, VerdictStatus::Approved);
    assert_eq!(record.verdict.confidence, 0.97);

    // The fan-out event reconciles the placeholder in place.
    let update = updates.recv().await.unwrap();
    assert_eq!(update.submission_id, submission.id);
    assert_eq!(update.original_content, "Have a nice day");

    feed.apply(update);
    assert_eq!(feed.len(), 1);
    match &feed.entries()[0] {
        FeedEntry::Decided(decided) => {
            assert_eq!(decided.status, VerdictStatus::Approved);
            assert_eq!(decided.submission_id, submission.id);
        }
        FeedEntry::Pending(_) => panic!("placeholder was not reconciled"),
    }
}

#[tokio::test]
async fn hateful_submission_is_flagged_and_broadcast() {
    let queue = MemoryQueue::new();
    let store = MemoryStore::new();
    let publisher = MemoryUpdatePublisher::new(16);
    let mut updates = publisher.subscribe();

    let submission = Submission::from_request(&submit_request("I hate you")).unwrap();
    queue
        .publish(&serde_json::to_vec(&submission).unwrap())
        .await
        .unwrap();

    let worker = make_worker(store.clone(), publisher.clone());
    let mut consumer = queue.consumer(MODERATION_GROUP, "w0").await.unwrap();
    let delivery = consumer.next().await.unwrap();
    let consumed: Submission = serde_json::from_slice(&delivery.payload).unwrap();
    worker.handle(&consumed).await.unwrap();
    consumer.ack(&delivery.id).await.unwrap();

    let record = store.find(submission.id).await.unwrap().unwrap();
    assert_eq!(record.verdict.status, VerdictStatus::Flagged);
    assert_eq!(record.verdict.reason.as_deref(), Some("hate speech"));
    assert_eq!(record.verdict.confidence, 0.88);

    let update = updates.recv().await.unwrap();
    assert_eq!(update.status, VerdictStatus::Flagged);
    assert_eq!(update.reason.as_deref(), Some("hate speech"));
}

#[tokio::test]
async fn invalid_submissions_never_reach_the_queue() {
    let queue = MemoryQueue::new();

    let too_long = "x".repeat(1001);
    for content in ["", too_long.as_str()] {
        let result = Submission::from_request(&submit_request(content));
        assert!(result.is_err(), "content of {} chars passed validation", content.len());
    }

    // Nothing was published during validation failures.
    assert_eq!(queue.len().await, 0);
}

#[tokio::test]
async fn redelivered_submission_is_absorbed_idempotently() {
    let queue = MemoryQueue::new();
    let store = MemoryStore::new();
    let publisher = MemoryUpdatePublisher::new(16);
    let mut updates = publisher.subscribe();

    let submission = Submission::from_request(&submit_request("Have a nice day")).unwrap();
    queue
        .publish(&serde_json::to_vec(&submission).unwrap())
        .await
        .unwrap();

    let worker = make_worker(store.clone(), publisher.clone());
    let mut consumer = queue.consumer(MODERATION_GROUP, "w0").await.unwrap();

    // First attempt processes fully but crashes before the ack.
    let delivery = consumer.next().await.unwrap();
    let consumed: Submission = serde_json::from_slice(&delivery.payload).unwrap();
    worker.handle(&consumed).await.unwrap();
    queue.requeue_unacked(MODERATION_GROUP).await;

    // Redelivery repeats classify+persist+publish, then acks.
    let redelivery = consumer.next().await.unwrap();
    assert_eq!(redelivery.id, delivery.id);
    let consumed_again: Submission = serde_json::from_slice(&redelivery.payload).unwrap();
    worker.handle(&consumed_again).await.unwrap();
    consumer.ack(&redelivery.id).await.unwrap();

    // One record, one consistent verdict.
    assert_eq!(store.len().await, 1);
    let record = store.find(submission.id).await.unwrap().unwrap();
    assert_eq!(record.verdict.status, VerdictStatus::Approved);

    // The duplicate broadcast collapses to a single feed entry.
    let mut feed = ModerationFeed::new(ChronoDuration::minutes(5));
    feed.submitted(submission.id, submission.content.clone());
    let first = updates.recv().await.unwrap();
    let second = updates.recv().await.unwrap();
    assert_eq!(first.submission_id, second.submission_id);
    feed.apply(first);
    feed.apply(second);
    assert_eq!(feed.len(), 1);
}

#[tokio::test]
async fn full_run_loop_drives_submissions_to_the_feed() {
    let queue = MemoryQueue::new();
    let store = MemoryStore::new();
    let publisher = MemoryUpdatePublisher::new(16);
    let mut updates = publisher.subscribe();

    let friendly = Submission::from_request(&submit_request("Have a nice day")).unwrap();
    let hateful = Submission::from_request(&submit_request("I hate you")).unwrap();

    let mut feed = ModerationFeed::new(ChronoDuration::minutes(5));
    for submission in [&friendly, &hateful] {
        queue
            .publish(&serde_json::to_vec(submission).unwrap())
            .await
            .unwrap();
        feed.submitted(submission.id, submission.content.clone());
    }

    let worker = make_worker(store.clone(), publisher.clone());
    let consumer = queue.consumer(MODERATION_GROUP, "w0").await.unwrap();
    let handle = tokio::spawn(async move { worker.run(consumer).await });

    for _ in 0..2 {
        let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("no update within deadline")
            .unwrap();
        feed.apply(update);
    }
    handle.abort();

    assert_eq!(store.len().await, 2);
    assert_eq!(feed.len(), 2);
    assert!(feed.entries().iter().all(|entry| !entry.is_pending()));

    // Feed order still mirrors submission order: hateful was submitted
    // last, so it sits on top, now decided.
    assert_eq!(feed.entries()[0].submission_id(), hateful.id);
    assert_eq!(feed.entries()[1].submission_id(), friendly.id);
}
