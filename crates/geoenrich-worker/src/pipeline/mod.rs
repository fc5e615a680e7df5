//! Per-job streaming pipeline
//!
//! ```text
//! source ──reader──▶ task feed ──N workers──▶ result feed ──writer──▶ sink
//! ```
//!
//! Both feeds are bounded channels, so a slow sink stalls the workers and
//! slow workers stall the reader. The feeds close in order: the reader drops
//! the task sender, the last worker drops its result sender, and the writer
//! then finalizes the sink. [`Pipeline::run`] joins all three stage tasks
//! before returning.
//!
//! The stages share a child of the caller's token. A sink write error
//! cancels it, which stops the reader and workers without cancelling the
//! caller.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::resolver::AddressResolver;
use crate::storage::{ObjectReader, ObjectSink};

pub mod pool;
pub mod reader;
pub mod writer;

pub use pool::{ActiveWorkers, PoolSummary, WorkerPool};
pub use reader::{read_addresses, ReadSummary};
pub use writer::{write_results, WriteSummary};

/// Counts reported once a job's pipeline has fully drained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub records_read: u64,
    pub records_skipped: u64,
    pub results_produced: u64,
    pub lines_written: u64,
    pub serialization_skips: u64,
    /// Decode error that ended the input early.
    pub read_error: Option<String>,
}

#[derive(Clone)]
pub struct Pipeline {
    resolver: AddressResolver,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(resolver: AddressResolver, config: PipelineConfig) -> Self {
        Self { resolver, config }
    }

    /// Stream `source` through the resolver pool into `sink`.
    ///
    /// Per-address failures are data in the output. Errors are returned only
    /// for sink failures, a panicked stage, or cancellation.
    pub async fn run(
        &self,
        source: ObjectReader,
        sink: Box<dyn ObjectSink>,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        self.run_observed(source, sink, cancel, |_| {}).await
    }

    /// As [`run`](Self::run), handing the pool's live worker count to
    /// `observe` before any stage starts.
    pub async fn run_observed(
        &self,
        source: ObjectReader,
        sink: Box<dyn ObjectSink>,
        cancel: &CancellationToken,
        observe: impl FnOnce(ActiveWorkers),
    ) -> Result<PipelineReport, PipelineError> {
        let (task_tx, task_rx) = mpsc::channel(self.config.task_feed_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel(self.config.result_feed_capacity.max(1));

        let pool = WorkerPool::new(self.resolver.clone(), self.config.pool_size);
        observe(pool.active_workers());

        let stop = cancel.child_token();
        let reader = tokio::spawn(read_addresses(source, task_tx, stop.clone()).in_current_span());
        let workers = tokio::spawn(pool.run(task_rx, result_tx, stop.clone()).in_current_span());
        let writer = tokio::spawn(write_results(result_rx, sink, stop).in_current_span());

        // Drain barrier: every stage has exited once this returns.
        let (read, pooled, written) = tokio::join!(reader, workers, writer);

        let read = read.map_err(|e| stage_failed("reader", e))?;
        let pooled = pooled.map_err(|e| stage_failed("pool", e))?;
        let written = written.map_err(|e| stage_failed("writer", e))??;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        if pooled.panicked_workers > 0 {
            return Err(PipelineError::StagePanicked("worker"));
        }

        let report = PipelineReport {
            records_read: read.records_read,
            records_skipped: read.records_skipped,
            results_produced: pooled.results_produced,
            lines_written: written.lines_written,
            serialization_skips: written.serialization_skips,
            read_error: read.error,
        };

        info!(
            records_read = report.records_read,
            records_skipped = report.records_skipped,
            results = report.results_produced,
            lines_written = report.lines_written,
            serialization_skips = report.serialization_skips,
            read_error = report.read_error.as_deref(),
            "Pipeline drained"
        );

        Ok(report)
    }
}

fn stage_failed(stage: &'static str, err: tokio::task::JoinError) -> PipelineError {
    error!(stage, error = %err, "Pipeline stage failed");
    PipelineError::StagePanicked(stage)
}
