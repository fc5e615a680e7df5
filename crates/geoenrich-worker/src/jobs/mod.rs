//! Job status store and job queue

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use geoenrich_common::types::{Job, JobStatus};
use geoenrich_common::GeoenrichError;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::StoreError;

pub mod queue;

pub use queue::{JobQueue, PgJobQueue, QueueMessage};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new PENDING job.
    async fn create(&self, job_id: Uuid, input_location: &str) -> Result<Job, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Move a job to `status`.
    ///
    /// Only transitions allowed by [`JobStatus::can_transition_to`] are
    /// applied; anything else fails with `InvalidTransition` and leaves the
    /// record untouched. `result_location` is kept when `None` is passed.
    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_location: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Postgres-backed job status store over the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    input_path: String,
    result_path: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = GeoenrichError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            status: row.status.parse()?,
            input_location: row.input_path,
            result_location: row.result_path,
            error: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn create(&self, job_id: Uuid, input_location: &str) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, status, input_path)
            VALUES ($1, $2, $3)
            RETURNING id, status, input_path, result_path, error_message, created_at, updated_at
            "#,
        )
        .bind(job_id)
        .bind(JobStatus::Pending.as_str())
        .bind(input_location)
        .fetch_one(&self.pool)
        .await?;

        Ok(Job::try_from(row)?)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT id, status, input_path, result_path, error_message, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;

        Ok(Job::try_from(row)?)
    }

    #[instrument(skip(self, error))]
    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_location: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let allowed_from: Vec<String> = JobStatus::predecessors(status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1,
                result_path = COALESCE($2, result_path),
                error_message = $3,
                updated_at = NOW()
            WHERE id = $4 AND status = ANY($5)
            "#,
        )
        .bind(status.as_str())
        .bind(result_location)
        .bind(error)
        .bind(job_id)
        .bind(&allowed_from)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            let current = self.get(job_id).await?;
            return Err(GeoenrichError::InvalidTransition {
                job_id: job_id.to_string(),
                from: current.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        debug!(%status, "Job status updated");
        Ok(())
    }
}
