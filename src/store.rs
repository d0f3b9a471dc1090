use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ModerationRecord, Submission, Verdict, VerdictStatus};

/// Idempotent persistence contract for moderation records.
///
/// `upsert` must tolerate redelivery: at most one record exists per
/// submission id and the first stored verdict wins.
#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert(
        &self,
        submission: &Submission,
        verdict: &Verdict,
    ) -> Result<ModerationRecord, StoreError>;

    async fn find(&self, submission_id: Uuid) -> Result<Option<ModerationRecord>, StoreError>;
}

/// Postgres-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                display_name TEXT NOT NULL,
                email TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_records (
                submission_id UUID PRIMARY KEY,
                user_id UUID NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                status TEXT NOT NULL,
                confidence DOUBLE PRECISION NOT NULL,
                reason TEXT,
                submitted_at TIMESTAMPTZ NOT NULL,
                stored_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Lazily materialize the submitting user. Concurrent first submissions
    /// from a new user both race through `DO NOTHING`; whichever insert
    /// lands first wins and the other is a no-op.
    async fn ensure_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, email)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(format!("user-{}", user_id))
        .bind(format!("{}@placeholder.invalid", user_id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn record_from_row(row: &PgRow) -> Result<ModerationRecord, StoreError> {
        let status_text: String = row.try_get("status")?;
        let status = VerdictStatus::parse(&status_text).ok_or_else(|| {
            StoreError::Unavailable(format!("unknown verdict status in store: {}", status_text))
        })?;

        Ok(ModerationRecord {
            submission: Submission {
                id: row.try_get("submission_id")?,
                user_id: row.try_get("user_id")?,
                content: row.try_get("content")?,
                created_at: row.try_get::<DateTime<Utc>, _>("submitted_at")?,
            },
            verdict: Verdict {
                status,
                confidence: row.try_get("confidence")?,
                reason: row.try_get("reason")?,
            },
            stored_at: row.try_get::<DateTime<Utc>, _>("stored_at")?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert(
        &self,
        submission: &Submission,
        verdict: &Verdict,
    ) -> Result<ModerationRecord, StoreError> {
        self.ensure_user(submission.user_id).await?;

        // DO NOTHING on conflict: a redelivered submission must not
        // overwrite the verdict that was stored first.
        sqlx::query(
            r#"
            INSERT INTO moderation_records
                (submission_id, user_id, content, status, confidence, reason, submitted_at, stored_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (submission_id) DO NOTHING
            "#,
        )
        .bind(submission.id)
        .bind(submission.user_id)
        .bind(&submission.content)
        .bind(verdict.status.as_str())
        .bind(verdict.confidence)
        .bind(&verdict.reason)
        .bind(submission.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM moderation_records WHERE submission_id = $1",
        )
        .bind(submission.id)
        .fetch_one(&self.pool)
        .await?;

        Self::record_from_row(&row)
    }

    async fn find(&self, submission_id: Uuid) -> Result<Option<ModerationRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM moderation_records WHERE submission_id = $1",
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }
}

/// In-memory store honouring the same first-verdict-wins contract, used by
/// the worker and pipeline tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<Uuid, ModerationRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail, to exercise the redelivery path.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert(
        &self,
        submission: &Submission,
        verdict: &Verdict,
    ) -> Result<ModerationRecord, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }

        let mut records = self.records.lock().await;
        let record = records
            .entry(submission.id)
            .or_insert_with(|| ModerationRecord {
                submission: submission.clone(),
                verdict: verdict.clone(),
                stored_at: Utc::now(),
            });
        Ok(record.clone())
    }

    async fn find(&self, submission_id: Uuid) -> Result<Option<ModerationRecord>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(self.records.lock().await.get(&submission_id).cloned())
    }
}
