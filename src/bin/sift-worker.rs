use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use sift_server::{
    broker::{RedisQueue, RedisUpdatePublisher, SubmissionQueue, MODERATION_GROUP},
    classifier::GeminiClassifier,
    config::Config,
    redis_client::RedisClient,
    store::PgStore,
    worker::ModerationWorker,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env();

    if let Err(e) = PrometheusBuilder::new().install() {
        warn!(error = %e, "prometheus exporter not installed");
    }

    let redis = RedisClient::new(&config.redis_url).await?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set for the worker")?;
    let store = PgStore::connect(&database_url).await?;
    store.migrate().await?;

    let api_key = match config.gemini_api_key.clone() {
        Some(key) => key,
        None => {
            warn!("GEMINI_API_KEY not set; every classification will fail closed");
            String::new()
        }
    };
    let classifier = GeminiClassifier::new(api_key, config.gemini_model.clone());

    let queue = RedisQueue::new(redis.clone());
    let worker = ModerationWorker::new(
        Arc::new(classifier),
        Arc::new(store),
        Arc::new(RedisUpdatePublisher::new(redis.clone())),
        config.classify_timeout,
        config.persist_timeout,
    );

    let mut handles = Vec::new();
    for i in 0..config.worker_concurrency.max(1) {
        let consumer = queue
            .consumer(MODERATION_GROUP, &format!("worker-{}", i))
            .await?;
        let worker = worker.clone();
        handles.push(tokio::spawn(async move { worker.run(consumer).await }));
    }

    info!(
        consumers = config.worker_concurrency.max(1),
        group = MODERATION_GROUP,
        "moderation worker running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping consumers");
    for handle in &handles {
        handle.abort();
    }

    Ok(())
}
