//! Pipeline integration tests
//!
//! Run the reader, worker pool and writer end to end against in-memory
//! storage and a scripted places API.

use geoenrich_common::types::ResolutionResult;
use geoenrich_worker::{
    config::PipelineConfig,
    error::PipelineError,
    pipeline::{ActiveWorkers, Pipeline},
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod helpers;
use helpers::*;

const BUCKET: &str = "results";
const KEY: &str = "results/test.jsonl";

fn pipeline(places: ScriptedPlaces, config: PipelineConfig) -> Pipeline {
    init_tracing();
    Pipeline::new(
        resolver(Arc::new(places), Arc::new(CountingThrottle::new())),
        config,
    )
}

fn config(pool_size: usize, capacity: usize) -> PipelineConfig {
    PipelineConfig {
        pool_size,
        task_feed_capacity: capacity,
        result_feed_capacity: capacity,
    }
}

fn sorted_addresses(results: &[ResolutionResult]) -> Vec<String> {
    let mut addresses: Vec<String> = results.iter().map(|r| r.address.clone()).collect();
    addresses.sort();
    addresses
}

fn sorted_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}

#[tokio::test]
async fn test_one_result_per_address() {
    let storage = MemoryStorage::new();
    let input = addresses(120);
    let pipeline = pipeline(ScriptedPlaces::new(), config(8, 4));

    let report = pipeline
        .run(
            MemoryStorage::reader(csv_of(&input)),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.records_read, 120);
    assert_eq!(report.results_produced, 120);
    assert_eq!(report.lines_written, 120);
    assert_eq!(report.read_error, None);

    let results = storage.results(BUCKET, KEY);
    let mut expected = input.clone();
    expected.sort();
    assert_eq!(sorted_addresses(&results), expected);
    assert!(results.iter().all(|r| r.is_resolved()));
}

#[tokio::test]
async fn test_mixed_outcomes_all_written() {
    let storage = MemoryStorage::new();
    let places = ScriptedPlaces::new()
        .script("nowhere", AddressScript::no_results())
        .script("broken", AddressScript::geocode_fails("timeout"));
    let input = vec![
        "1 Test Street".to_string(),
        "nowhere".to_string(),
        "broken".to_string(),
    ];

    let report = pipeline(places, config(2, 2))
        .run(
            MemoryStorage::reader(csv_of(&input)),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.lines_written, 3);

    let results = storage.results(BUCKET, KEY);
    let resolved = results.iter().filter(|r| r.is_resolved()).count();
    let tagged = results.iter().filter(|r| r.status_tag.is_some()).count();
    let errored = results
        .iter()
        .filter(|r| r.status_tag.is_none() && r.error.is_some())
        .count();
    assert_eq!((resolved, tagged, errored), (1, 1, 1));
}

#[tokio::test]
async fn test_blank_rows_are_skipped() {
    let storage = MemoryStorage::new();
    let csv = b"address,note\n1 Test Street,a\n,b\n   ,c\n2 Test Street,d\n".to_vec();

    let report = pipeline(ScriptedPlaces::new(), config(3, 2))
        .run(
            MemoryStorage::reader(csv),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.records_read, 2);
    assert_eq!(report.records_skipped, 2);
    assert_eq!(
        sorted_addresses(&storage.results(BUCKET, KEY)),
        vec!["1 Test Street", "2 Test Street"]
    );
}

#[tokio::test]
async fn test_header_only_input_produces_empty_output() {
    let storage = MemoryStorage::new();

    let report = pipeline(ScriptedPlaces::new(), config(4, 4))
        .run(
            MemoryStorage::reader(b"address\n".to_vec()),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.records_read, 0);
    assert_eq!(report.lines_written, 0);
    assert_eq!(storage.object(BUCKET, KEY), Some(Vec::new()));
}

#[tokio::test]
async fn test_rerun_produces_same_multiset() {
    let input = addresses(40);
    let first = MemoryStorage::new();
    let second = MemoryStorage::new();

    for storage in [&first, &second] {
        pipeline(ScriptedPlaces::new(), config(6, 3))
            .run(
                MemoryStorage::reader(csv_of(&input)),
                storage.sink(BUCKET, KEY),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    let first = sorted_lines(&first.object(BUCKET, KEY).unwrap());
    let second = sorted_lines(&second.object(BUCKET, KEY).unwrap());
    assert_eq!(first.len(), 40);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_tiny_feeds_still_drain() {
    let storage = MemoryStorage::new();
    let places = ScriptedPlaces::new().with_latency(Duration::from_millis(1));

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        pipeline(places, config(2, 1)).run(
            MemoryStorage::reader(csv_of(&addresses(50))),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("pipeline finished")
    .unwrap();

    assert_eq!(report.lines_written, 50);
    assert_eq!(storage.results(BUCKET, KEY).len(), 50);
}

#[tokio::test]
async fn test_decode_error_keeps_earlier_results() {
    let storage = MemoryStorage::new();
    let mut csv = b"address\n1 Test Street\n".to_vec();
    csv.extend_from_slice(b"\xff\xfe bad\n3 Test Street\n");

    let report = pipeline(ScriptedPlaces::new(), config(2, 2))
        .run(
            MemoryStorage::reader(csv),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.records_read, 1);
    assert!(report.read_error.is_some());
    assert_eq!(
        sorted_addresses(&storage.results(BUCKET, KEY)),
        vec!["1 Test Street"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_all_workers() {
    let storage = MemoryStorage::new();
    let places = ScriptedPlaces::new().with_latency(Duration::from_millis(50));
    let pipeline = pipeline(places, config(4, 2));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            cancel.cancel();
        }
    });

    let observed: Arc<Mutex<Option<ActiveWorkers>>> = Arc::default();
    let result = pipeline
        .run_observed(
            MemoryStorage::reader(csv_of(&addresses(500))),
            storage.sink(BUCKET, KEY),
            &cancel,
            |active| *observed.lock().unwrap() = Some(active),
        )
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(observed.lock().unwrap().as_ref().unwrap().get(), 0);

    // Partial output is finalized, never more than one line per address.
    let written = storage.results(BUCKET, KEY);
    assert!(written.len() < 500);
    assert!(written.iter().all(|r| r.is_resolved()));
}

#[tokio::test]
async fn test_sink_write_failure_does_not_deadlock() {
    let storage = MemoryStorage::new();
    storage.fail_writes_after(3);

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        pipeline(ScriptedPlaces::new(), config(4, 1)).run(
            MemoryStorage::reader(csv_of(&addresses(200))),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("pipeline finished");

    assert!(matches!(result, Err(PipelineError::Sink(_))));
    assert_eq!(storage.aborted(), 1);
    assert_eq!(storage.object(BUCKET, KEY), None);
}

#[tokio::test]
async fn test_sink_write_failure_stops_lookups() {
    init_tracing();
    let storage = MemoryStorage::new();
    storage.fail_writes_after(3);
    let places = Arc::new(ScriptedPlaces::new());
    let pipeline = Pipeline::new(
        resolver(places.clone(), Arc::new(CountingThrottle::new())),
        config(4, 1),
    );
    let caller = CancellationToken::new();

    let result = tokio::time::timeout(
        Duration::from_secs(30),
        pipeline.run(
            MemoryStorage::reader(csv_of(&addresses(200))),
            storage.sink(BUCKET, KEY),
            &caller,
        ),
    )
    .await
    .expect("pipeline finished");

    assert!(matches!(result, Err(PipelineError::Sink(_))));
    // Resolving every address would take 600 lookups.
    assert!(places.calls() < 100, "lookups continued: {}", places.calls());
    assert!(!caller.is_cancelled());
}

#[tokio::test]
async fn test_sink_finalize_failure() {
    let storage = MemoryStorage::new();
    storage.fail_finish();

    let result = pipeline(ScriptedPlaces::new(), config(2, 2))
        .run(
            MemoryStorage::reader(csv_of(&addresses(5))),
            storage.sink(BUCKET, KEY),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(PipelineError::Sink(_))));
    assert_eq!(storage.object(BUCKET, KEY), None);
}
