use geoenrich_common::types::ResolutionResult;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::error::{PipelineError, StorageError};
use crate::storage::ObjectSink;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub lines_written: u64,
    pub serialization_skips: u64,
    pub cancelled: bool,
}

/// Drain `results` into `sink` as NDJSON, then finalize the sink.
///
/// Lines are written in arrival order. A result that fails to serialize is
/// logged and skipped. The first sink write error cancels `cancel` so the
/// upstream stages stop resolving, then the feed is drained until the workers
/// drop their senders, the upload is aborted and the error returned.
/// Cancellation from elsewhere stops the drain and finalizes what was already
/// written.
#[instrument(skip_all)]
pub async fn write_results(
    mut results: Receiver<ResolutionResult>,
    mut sink: Box<dyn ObjectSink>,
    cancel: CancellationToken,
) -> Result<WriteSummary, PipelineError> {
    let mut summary = WriteSummary::default();
    let mut write_error: Option<StorageError> = None;

    loop {
        let next = if write_error.is_some() {
            results.recv().await
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    summary.cancelled = true;
                    break;
                },
                next = results.recv() => next,
            }
        };
        let Some(result) = next else { break };

        let mut line = match serde_json::to_vec(&result) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, address = %result.address, "Skipping unserializable result");
                summary.serialization_skips += 1;
                continue;
            },
        };
        line.push(b'\n');

        if write_error.is_some() {
            continue;
        }

        match sink.write(&line).await {
            Ok(()) => summary.lines_written += 1,
            Err(e) => {
                error!(error = %e, written = summary.lines_written, "Output write failed, stopping upstream stages");
                write_error = Some(e);
                cancel.cancel();
            },
        }
    }

    if let Some(e) = write_error {
        if let Err(abort_err) = sink.abort().await {
            warn!(error = %abort_err, "Failed to abort output after write error");
        }
        return Err(PipelineError::Sink(e));
    }

    sink.finish().await.map_err(PipelineError::Sink)?;

    debug!(
        lines = summary.lines_written,
        skipped = summary.serialization_skips,
        "Output finalized"
    );
    Ok(summary)
}
