use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use tracing::warn;

/// Redis client wrapper for the pipeline's three uses of Redis: the
/// admission counter, the durable submission stream, and the update fan-out.
///
/// Connection security follows the URL scheme: `rediss://` enables TLS,
/// and a URL without a password is allowed but logged as a degradation.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    client: Client,
}

impl RedisClient {
    /// Create a new Redis client from a connection URL.
    pub async fn new(redis_url: &str) -> Result<Self> {
        if !redis_url.contains("://") {
            return Err(anyhow::anyhow!(
                "Invalid Redis URL format. Expected: redis://:password@host:port or rediss://:password@host:port"
            ));
        }

        if !redis_url.contains('@') {
            warn!("Redis URL does not include a password; running without authentication");
        }

        let client = redis::Client::open(redis_url)
            .context("Failed to create Redis client from URL")?;

        let manager = ConnectionManager::new(client.clone())
            .await
            .context("Failed to create Redis connection manager - check REDIS_URL")?;

        Ok(Self { manager, client })
    }

    /// Get the underlying client for pub/sub and dedicated stream connections.
    ///
    /// Blocking reads (XREADGROUP BLOCK, SUBSCRIBE) must run on their own
    /// connection so they never stall commands multiplexed on the manager.
    pub fn get_client(&self) -> Client {
        self.client.clone()
    }

    /// Increment a key and return the new value.
    pub async fn incr(&self, key: &str) -> Result<i64, RedisError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await
    }

    /// Set expiration on a key.
    pub async fn expire(&self, key: &str, seconds: i64) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        conn.expire(key, seconds).await
    }

    /// Publish a payload to a pub/sub channel (best-effort fan-out).
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
    }

    /// Append an entry to a stream, letting Redis assign the entry id.
    pub async fn xadd(
        &self,
        stream: &str,
        field: &str,
        payload: &[u8],
    ) -> Result<String, RedisError> {
        let mut conn = self.manager.clone();
        conn.xadd(stream, "*", &[(field, payload)]).await
    }

    /// Create a consumer group on a stream, creating the stream if needed.
    /// An already-existing group is not an error.
    pub async fn xgroup_create_mkstream(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<(), RedisError> {
        let mut conn = self.manager.clone();
        let created: Result<String, RedisError> =
            conn.xgroup_create_mkstream(stream, group, "$").await;
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Ping Redis to check if the connection is alive.
    pub async fn ping(&self) -> Result<bool, RedisError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|resp| resp == "PONG")
    }
}
