use csv_async::{AsyncReaderBuilder, StringRecord};
use tokio::io::AsyncRead;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// What the reader saw before the task feed closed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    /// Addresses handed to the task feed.
    pub records_read: u64,
    /// Rows dropped because the address column was blank.
    pub records_skipped: u64,
    /// Decode error that stopped reading early, if any.
    pub error: Option<String>,
    pub cancelled: bool,
}

/// Stream CSV rows from `source` onto `tasks`, one address per row.
///
/// The first row is a header and is never sent. The address is the first
/// column. A decode error is logged and ends the read. The feed is closed
/// when this returns because `tasks` is dropped.
#[instrument(skip_all)]
pub async fn read_addresses<R>(
    source: R,
    tasks: Sender<String>,
    cancel: CancellationToken,
) -> ReadSummary
where
    R: AsyncRead + Unpin + Send,
{
    let mut reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .create_reader(source);
    let mut record = StringRecord::new();
    let mut summary = ReadSummary::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            },
            next = reader.read_record(&mut record) => next,
        };

        match next {
            Ok(true) => {},
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, records = summary.records_read, "Failed to decode input, stopping read");
                summary.error = Some(e.to_string());
                break;
            },
        }

        let address = record.get(0).unwrap_or_default();
        if address.trim().is_empty() {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            warn!(line, "Skipping row with blank address");
            summary.records_skipped += 1;
            continue;
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.cancelled = true;
                break;
            },
            sent = tasks.send(address.to_string()) => sent,
        };

        if sent.is_err() {
            // Every worker is gone; nothing left to feed.
            warn!("Task feed closed by consumers, stopping read");
            break;
        }
        summary.records_read += 1;
    }

    debug!(
        records = summary.records_read,
        skipped = summary.records_skipped,
        cancelled = summary.cancelled,
        "Input exhausted, closing task feed"
    );
    summary
}
