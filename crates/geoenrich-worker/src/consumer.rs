//! Queue consumer
//!
//! Polls the job queue and hands each message to the orchestrator. A
//! message is acknowledged only after PROCESSING has been recorded, so a
//! crash before that point leads to redelivery. At most
//! `max_concurrent_jobs` jobs run at once; a slot is reserved before a
//! message is claimed.

use geoenrich_common::types::JobMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::QueueConfig;
use crate::jobs::{JobQueue, QueueMessage};
use crate::orchestrator::{BeginOutcome, JobOrchestrator, JobOutcome};

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    orchestrator: Arc<JobOrchestrator>,
    config: QueueConfig,
}

impl JobConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        orchestrator: Arc<JobOrchestrator>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            config,
        }
    }

    /// Consume until `shutdown` fires.
    ///
    /// In-flight jobs are cancelled with the consumer and given
    /// `shutdown_timeout` to record their final status before being aborted.
    pub async fn run(&self, shutdown: CancellationToken) {
        let slots = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut jobs: JoinSet<JobOutcome> = JoinSet::new();

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "Job consumer started"
        );

        loop {
            while let Some(done) = jobs.try_join_next() {
                log_finished(done);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.config.visibility_timeout()) => received,
            };

            match received {
                Ok(Some(message)) => {
                    self.dispatch(message, permit, &mut jobs, &shutdown).await;
                },
                Ok(None) => {
                    drop(permit);
                    if idle(&shutdown, self.config.poll_interval()).await {
                        break;
                    }
                },
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "Failed to poll job queue");
                    if idle(&shutdown, self.config.poll_interval()).await {
                        break;
                    }
                },
            }
        }

        self.drain(jobs).await;
        info!("Job consumer stopped");
    }

    async fn dispatch(
        &self,
        message: QueueMessage,
        permit: OwnedSemaphorePermit,
        jobs: &mut JoinSet<JobOutcome>,
        shutdown: &CancellationToken,
    ) {
        let job: JobMessage = match message.decode() {
            Ok(job) => job,
            Err(e) => {
                let reason = format!("malformed job message: {e}");
                if let Err(e) = self.queue.dead_letter(message.id, &reason).await {
                    error!(message_id = message.id, error = %e, "Failed to dead-letter message");
                }
                return;
            },
        };

        debug!(
            message_id = message.id,
            job_id = %job.job_id,
            delivery = message.delivery_count,
            "Received job message"
        );

        match self.orchestrator.begin(job.job_id).await {
            Ok(BeginOutcome::Started) => {},
            Ok(BeginOutcome::AlreadyTerminal(status)) => {
                info!(job_id = %job.job_id, %status, "Job already finished, acknowledging redelivery");
                self.ack(message.id).await;
                return;
            },
            Err(e) => {
                // Leave unacknowledged; it becomes visible again after the timeout.
                error!(job_id = %job.job_id, error = %e, "Failed to record PROCESSING, leaving message for redelivery");
                return;
            },
        }

        self.ack(message.id).await;

        let orchestrator = self.orchestrator.clone();
        let cancel = shutdown.child_token();
        let span = tracing::info_span!("job", job_id = %job.job_id);

        jobs.spawn(
            async move {
                let _slot = permit;
                orchestrator.run(&job, &cancel).await
            }
            .instrument(span),
        );
    }

    async fn ack(&self, id: i64) {
        if let Err(e) = self.queue.ack(id).await {
            warn!(message_id = id, error = %e, "Failed to acknowledge message");
        }
    }

    async fn drain(&self, mut jobs: JoinSet<JobOutcome>) {
        if jobs.is_empty() {
            return;
        }

        let timeout = self.config.shutdown_timeout();
        info!(
            in_flight = jobs.len(),
            timeout_secs = timeout.as_secs(),
            "Waiting for in-flight jobs"
        );

        let waited = tokio::time::timeout(timeout, async {
            while let Some(done) = jobs.join_next().await {
                log_finished(done);
            }
        })
        .await;

        if waited.is_err() {
            warn!(remaining = jobs.len(), "Shutdown timeout reached, aborting jobs");
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}
        }
    }
}

/// Sleep for `interval`; true if shutdown fired first.
async fn idle(shutdown: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(interval) => false,
    }
}

fn log_finished(done: Result<JobOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) if !outcome.persisted => {
            error!(status = %outcome.status, "Job finished but its status was not recorded");
        },
        Ok(outcome) => debug!(status = %outcome.status, "Job finished"),
        Err(e) => error!(error = %e, "Job task failed"),
    }
}
