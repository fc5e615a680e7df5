//! Job orchestration
//!
//! Drives one job from PROCESSING to a terminal status:
//!
//! 1. persist PROCESSING ([`JobOrchestrator::begin`]), before the queue
//!    message is acknowledged
//! 2. open the input object and the result sink
//! 3. run the pipeline until every stage has drained
//! 4. persist COMPLETED with the result location, or FAILED with the error
//!
//! Per-address failures live in the output file and never fail a job.

use geoenrich_common::types::{JobMessage, JobStatus};
use geoenrich_common::GeoenrichError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::JobStore;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::storage::{object_url, result_key, split_object_url, ObjectStore};

pub const RESULT_CONTENT_TYPE: &str = "application/jsonl";

/// Outcome of [`JobOrchestrator::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// PROCESSING is durably recorded; the job should run.
    Started,
    /// The job already finished on an earlier delivery.
    AlreadyTerminal(JobStatus),
}

/// Terminal state reached by [`JobOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub result_location: Option<String>,
    pub error: Option<String>,
    pub report: Option<PipelineReport>,
    /// False if the terminal status could not be written to the store.
    pub persisted: bool,
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStore>,
    pipeline: Pipeline,
    input_bucket: String,
    results_bucket: String,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStore>,
        pipeline: Pipeline,
        input_bucket: impl Into<String>,
        results_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            storage,
            pipeline,
            input_bucket: input_bucket.into(),
            results_bucket: results_bucket.into(),
        }
    }

    /// Persist PROCESSING for `job_id`.
    ///
    /// An error means the status was not recorded and the delivery must not
    /// be acknowledged.
    #[instrument(skip(self))]
    pub async fn begin(&self, job_id: Uuid) -> Result<BeginOutcome, StoreError> {
        match self
            .store
            .update(job_id, JobStatus::Processing, None, None)
            .await
        {
            Ok(()) => Ok(BeginOutcome::Started),
            Err(StoreError::Common(GeoenrichError::InvalidTransition { .. })) => {
                let job = self.store.get(job_id).await?;
                if job.status.is_terminal() {
                    Ok(BeginOutcome::AlreadyTerminal(job.status))
                } else {
                    Err(GeoenrichError::InvalidTransition {
                        job_id: job_id.to_string(),
                        from: job.status.to_string(),
                        to: JobStatus::Processing.to_string(),
                    }
                    .into())
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Run a job whose PROCESSING status is already recorded.
    #[instrument(skip_all, fields(job_id = %message.job_id))]
    pub async fn run(&self, message: &JobMessage, cancel: &CancellationToken) -> JobOutcome {
        let (bucket, key) = split_object_url(&message.input_location)
            .unwrap_or((self.input_bucket.as_str(), message.input_location.as_str()));

        let source = match self.storage.open_read(bucket, key).await {
            Ok(source) => source,
            Err(e) => {
                error!(error = %e, "Failed to open job input");
                return self.fail(message.job_id, e.to_string()).await;
            },
        };

        let output_key = result_key(&message.job_id);
        let sink = match self
            .storage
            .open_write(&self.results_bucket, &output_key, RESULT_CONTENT_TYPE)
            .await
        {
            Ok(sink) => sink,
            Err(e) => {
                error!(error = %e, "Failed to open result sink");
                return self.fail(message.job_id, e.to_string()).await;
            },
        };

        info!(input = %object_url(bucket, key), "Processing job");

        match self.pipeline.run(source, sink, cancel).await {
            Ok(report) => {
                let location = object_url(&self.results_bucket, &output_key);
                let persisted = self
                    .persist(message.job_id, JobStatus::Completed, Some(&location), None)
                    .await;
                info!(result = %location, records = report.records_read, "Job completed");

                JobOutcome {
                    status: JobStatus::Completed,
                    result_location: Some(location),
                    error: None,
                    report: Some(report),
                    persisted,
                }
            },
            Err(e) => {
                error!(error = %e, "Job pipeline failed");
                self.fail(message.job_id, e.to_string()).await
            },
        }
    }

    /// Begin then run; `None` when the job was already terminal.
    pub async fn process(
        &self,
        message: &JobMessage,
        cancel: &CancellationToken,
    ) -> Result<Option<JobOutcome>, StoreError> {
        match self.begin(message.job_id).await? {
            BeginOutcome::Started => Ok(Some(self.run(message, cancel).await)),
            BeginOutcome::AlreadyTerminal(status) => {
                info!(job_id = %message.job_id, %status, "Job already finished, skipping");
                Ok(None)
            },
        }
    }

    async fn fail(&self, job_id: Uuid, error: String) -> JobOutcome {
        let persisted = self
            .persist(job_id, JobStatus::Failed, None, Some(&error))
            .await;

        JobOutcome {
            status: JobStatus::Failed,
            result_location: None,
            error: Some(error),
            report: None,
            persisted,
        }
    }

    async fn persist(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_location: Option<&str>,
        error: Option<&str>,
    ) -> bool {
        match self
            .store
            .update(job_id, status, result_location, error)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(%job_id, %status, error = %e, "Failed to persist terminal job status");
                false
            },
        }
    }
}
