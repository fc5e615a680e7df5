//! Test helpers for geoenrich worker integration tests
//!
//! In-memory stand-ins for every external collaborator:
//! - [`MemoryStorage`]: object store with failure injection
//! - [`MemoryJobStore`]: job status store enforcing status transitions
//! - [`MemoryQueue`]: job queue recording acks and dead letters
//! - [`ScriptedPlaces`]: deterministic places API driven by per-address scripts
//! - [`CountingThrottle`]: throttle that never waits and counts permits

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use geoenrich_common::types::{
    EstablishmentDetails, Job, JobMessage, JobStatus, ResolutionResult,
};
use geoenrich_common::GeoenrichError;
use geoenrich_worker::{
    error::{LookupError, QueueError, StorageError, StoreError},
    jobs::{JobQueue, JobStore, QueueMessage},
    places::{GeocodeCandidate, LatLng, NearbyPlace, PlacesApi},
    rate_limit::{RateLimitError, Throttle},
    resolver::AddressResolver,
    storage::{ObjectReader, ObjectSink, ObjectStore},
};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,geoenrich_worker=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// `count` distinct street addresses.
pub fn addresses(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{i} Test Street")).collect()
}

/// CSV with a header row and one quoted address per line.
pub fn csv_of(addresses: &[String]) -> Vec<u8> {
    let mut csv = String::from("address,note\n");
    for address in addresses {
        csv.push_str(&format!("\"{}\",x\n", address.replace('"', "\"\"")));
    }
    csv.into_bytes()
}

pub fn parse_ndjson(bytes: &[u8]) -> Vec<ResolutionResult> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(|line| serde_json::from_str(line).expect("result line is valid JSON"))
        .collect()
}

pub fn resolver(places: Arc<ScriptedPlaces>, throttle: Arc<CountingThrottle>) -> AddressResolver {
    AddressResolver::new(places, throttle)
}

// ============================================================================
// Object storage
// ============================================================================

/// URL handed out by [`MemoryStorage::presign_get`].
pub fn presigned_url(bucket: &str, key: &str, expires_in: Duration) -> String {
    format!("https://storage.test/{bucket}/{key}?expires={}", expires_in.as_secs())
}

#[derive(Default)]
struct StorageInner {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    fail_open_write: AtomicBool,
    fail_finish: AtomicBool,
    fail_presign: AtomicBool,
    /// Successful sink writes allowed before every further write fails.
    fail_writes_after: Mutex<Option<usize>>,
    aborted: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<StorageInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn results(&self, bucket: &str, key: &str) -> Vec<ResolutionResult> {
        self.object(bucket, key)
            .map(|bytes| parse_ndjson(&bytes))
            .unwrap_or_default()
    }

    pub fn fail_open_write(&self) {
        self.inner.fail_open_write.store(true, Ordering::SeqCst);
    }

    pub fn fail_finish(&self) {
        self.inner.fail_finish.store(true, Ordering::SeqCst);
    }

    pub fn fail_presign(&self) {
        self.inner.fail_presign.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes_after(&self, writes: usize) {
        *self.inner.fail_writes_after.lock().unwrap() = Some(writes);
    }

    pub fn aborted(&self) -> usize {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Sink that writes straight into this store.
    pub fn sink(&self, bucket: &str, key: &str) -> Box<dyn ObjectSink> {
        Box::new(MemorySink {
            inner: self.inner.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: Vec::new(),
            writes: 0,
        })
    }

    pub fn reader(bytes: Vec<u8>) -> ObjectReader {
        Box::pin(Cursor::new(bytes))
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, StorageError> {
        self.object(bucket, key)
            .map(Self::reader)
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn open_write(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
    ) -> Result<Box<dyn ObjectSink>, StorageError> {
        if self.inner.fail_open_write.load(Ordering::SeqCst) {
            return Err(StorageError::Open {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "injected open failure".to_string(),
            });
        }
        Ok(self.sink(bucket, key))
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        if self.inner.fail_presign.load(Ordering::SeqCst) {
            return Err(StorageError::Presign {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "injected presign failure".to_string(),
            });
        }
        Ok(presigned_url(bucket, key, expires_in))
    }
}

struct MemorySink {
    inner: Arc<StorageInner>,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
    writes: usize,
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(limit) = *self.inner.fail_writes_after.lock().unwrap() {
            if self.writes >= limit {
                return Err(StorageError::Write("injected write failure".to_string()));
            }
        }
        self.writes += 1;
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(), StorageError> {
        if self.inner.fail_finish.load(Ordering::SeqCst) {
            return Err(StorageError::Finalize("injected finalize failure".to_string()));
        }
        self.inner
            .objects
            .lock()
            .unwrap()
            .insert((self.bucket.clone(), self.key.clone()), self.buffer.clone());
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StorageError> {
        self.inner.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Job status store
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    history: Mutex<Vec<(Uuid, JobStatus)>>,
    fail_updates: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// Every status successfully written for `id`, in order.
    pub fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| *job == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job_id: Uuid, input_location: &str) -> Result<Job, StoreError> {
        let job = Job::pending(job_id, input_location);
        self.insert(job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.job(job_id).ok_or(StoreError::NotFound(job_id))
    }

    async fn update(
        &self,
        job_id: Uuid,
        status: JobStatus,
        result_location: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;

        if !job.status.can_transition_to(status) {
            return Err(GeoenrichError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        job.status = status;
        if let Some(location) = result_location {
            job.result_location = Some(location.to_string());
        }
        job.error = error.map(str::to_string);
        job.updated_at = Utc::now();

        self.history.lock().unwrap().push((job_id, status));
        Ok(())
    }
}

// ============================================================================
// Job queue
// ============================================================================

#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    next_id: AtomicI64,
    acked: Mutex<Vec<i64>>,
    dead: Mutex<Vec<(i64, String)>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_raw(&self, body: &str) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.lock().unwrap().push_back(QueueMessage {
            id,
            body: body.to_string(),
            delivery_count: 0,
        });
        id
    }

    pub fn is_drained(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }

    pub fn acked(&self) -> Vec<i64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<(i64, String)> {
        self.dead.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<i64, QueueError> {
        let body = serde_json::to_string(message)?;
        Ok(self.push_raw(&body))
    }

    async fn receive(&self, _visibility_timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        Ok(self.pending.lock().unwrap().pop_front().map(|mut message| {
            message.delivery_count += 1;
            message
        }))
    }

    async fn ack(&self, id: i64) -> Result<(), QueueError> {
        self.acked.lock().unwrap().push(id);
        Ok(())
    }

    async fn dead_letter(&self, id: i64, reason: &str) -> Result<(), QueueError> {
        self.dead.lock().unwrap().push((id, reason.to_string()));
        Ok(())
    }
}

// ============================================================================
// Places API
// ============================================================================

/// Scripted answers for one address.
#[derive(Clone)]
pub struct AddressScript {
    /// `Ok(Some(id))`: one geocode match with fallback id; `Ok(None)`: ZERO_RESULTS.
    pub geocode: Result<Option<String>, LookupError>,
    pub nearby: Result<Vec<NearbyPlace>, LookupError>,
    pub details: Result<EstablishmentDetails, LookupError>,
}

impl AddressScript {
    /// Geocodes to `geo:<address>`, finds restaurant `est:<address>` nearby.
    pub fn resolved(address: &str) -> Self {
        Self {
            geocode: Ok(Some(format!("geo:{address}"))),
            nearby: Ok(vec![place(&format!("est:{address}"), &["restaurant", "food"])]),
            details: Ok(details_for(address)),
        }
    }

    pub fn no_results() -> Self {
        Self {
            geocode: Ok(None),
            nearby: Ok(Vec::new()),
            details: Err(transport("unreachable")),
        }
    }

    pub fn geocode_fails(message: &str) -> Self {
        Self {
            geocode: Err(transport(message)),
            ..Self::no_results()
        }
    }

    pub fn with_nearby(mut self, nearby: Result<Vec<NearbyPlace>, LookupError>) -> Self {
        self.nearby = nearby;
        self
    }

    pub fn with_details(mut self, details: Result<EstablishmentDetails, LookupError>) -> Self {
        self.details = details;
        self
    }
}

pub fn place(id: &str, types: &[&str]) -> NearbyPlace {
    NearbyPlace {
        place_id: id.to_string(),
        name: id.to_string(),
        types: types.iter().map(|t| t.to_string()).collect(),
    }
}

pub fn details_for(address: &str) -> EstablishmentDetails {
    EstablishmentDetails {
        name: format!("Business at {address}"),
        formatted_address: address.to_string(),
        phone: Some("+1 555 0100".to_string()),
        website: None,
    }
}

pub fn transport(message: &str) -> LookupError {
    LookupError::Transport(message.to_string())
}

/// Deterministic places API.
///
/// Addresses without a script resolve via [`AddressScript::resolved`].
#[derive(Default)]
pub struct ScriptedPlaces {
    scripts: HashMap<String, AddressScript>,
    /// Geocoded addresses; a candidate's latitude is its index here.
    located: Mutex<Vec<String>>,
    owners: Mutex<HashMap<String, String>>,
    latency: Duration,
    calls: AtomicUsize,
    last_radius: AtomicU32,
}

impl ScriptedPlaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, address: &str, script: AddressScript) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_radius(&self) -> u32 {
        self.last_radius.load(Ordering::SeqCst)
    }

    fn script_for(&self, address: &str) -> AddressScript {
        self.scripts
            .get(address)
            .cloned()
            .unwrap_or_else(|| AddressScript::resolved(address))
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl PlacesApi for ScriptedPlaces {
    async fn geocode(&self, address: &str) -> Result<Vec<GeocodeCandidate>, LookupError> {
        self.enter().await;

        let Some(place_id) = self.script_for(address).geocode? else {
            return Ok(Vec::new());
        };

        let mut located = self.located.lock().unwrap();
        located.push(address.to_string());
        let lat = (located.len() - 1) as f64;

        Ok(vec![GeocodeCandidate {
            place_id,
            types: vec!["street_address".to_string()],
            location: LatLng::new(lat, 0.0),
        }])
    }

    async fn nearby_search(
        &self,
        location: LatLng,
        radius_meters: u32,
    ) -> Result<Vec<NearbyPlace>, LookupError> {
        self.enter().await;
        self.last_radius.store(radius_meters, Ordering::SeqCst);

        let address = self
            .located
            .lock()
            .unwrap()
            .get(location.lat as usize)
            .cloned()
            .ok_or_else(|| transport("unknown location"))?;

        let places = self.script_for(&address).nearby?;
        let mut owners = self.owners.lock().unwrap();
        for p in &places {
            owners.insert(p.place_id.clone(), address.clone());
        }
        Ok(places)
    }

    async fn place_details(&self, place_id: &str) -> Result<EstablishmentDetails, LookupError> {
        self.enter().await;

        let address = self
            .owners
            .lock()
            .unwrap()
            .get(place_id)
            .cloned()
            .ok_or_else(|| transport("unknown place"))?;

        self.script_for(&address).details
    }
}

// ============================================================================
// Throttle
// ============================================================================

/// Grants every permit immediately and counts them.
#[derive(Default)]
pub struct CountingThrottle {
    granted: AtomicUsize,
}

impl CountingThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granted(&self) -> usize {
        self.granted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Throttle for CountingThrottle {
    async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }
        self.granted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn try_acquire(&self) -> bool {
        self.granted.fetch_add(1, Ordering::SeqCst);
        true
    }
}
