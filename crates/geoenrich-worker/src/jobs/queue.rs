use async_trait::async_trait;
use geoenrich_common::types::JobMessage;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::QueueError;

/// A claimed, not yet acknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: i64,
    pub body: String,
    /// 1 on first delivery, higher on redelivery.
    pub delivery_count: i32,
}

impl QueueMessage {
    pub fn decode(&self) -> Result<JobMessage, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// At-least-once job message queue.
///
/// A received message stays invisible for the visibility timeout. Unless it
/// is acknowledged or dead-lettered in that window it is delivered again.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, message: &JobMessage) -> Result<i64, QueueError>;

    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>, QueueError>;

    async fn ack(&self, id: i64) -> Result<(), QueueError>;

    /// Park a message that can never be processed.
    async fn dead_letter(&self, id: i64, reason: &str) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[instrument(skip(self))]
    async fn enqueue(&self, message: &JobMessage) -> Result<i64, QueueError> {
        let body = serde_json::to_string(message)?;

        let id: i64 = sqlx::query_scalar("INSERT INTO job_queue (body) VALUES ($1) RETURNING id")
            .bind(body)
            .fetch_one(&self.pool)
            .await?;

        debug!(message_id = id, "Enqueued job message");
        Ok(id)
    }

    async fn receive(&self, visibility_timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let row: Option<(i64, String, i32)> = sqlx::query_as(
            r#"
            UPDATE job_queue
            SET claimed_at = NOW(),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id FROM job_queue
                WHERE dead_lettered_at IS NULL
                  AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $1))
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, body, delivery_count
            "#,
        )
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, body, delivery_count)| QueueMessage {
            id,
            body,
            delivery_count,
        }))
    }

    async fn ack(&self, id: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM job_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        warn!(message_id = id, reason, "Dead-lettering job message");

        sqlx::query(
            "UPDATE job_queue SET dead_lettered_at = NOW(), last_error = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
