//! Common types used across geoenrich

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GeoenrichError;

// ============================================================================
// Job Types
// ============================================================================

/// Lifecycle status of an enrichment job.
///
/// Status only moves forward: `PENDING → PROCESSING → {COMPLETED | FAILED}`.
/// A redelivered message may re-enter `PROCESSING` from `PROCESSING`, but a
/// terminal job never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }

    /// Statuses a job may be in for `next` to be applied.
    pub fn predecessors(next: JobStatus) -> &'static [JobStatus] {
        match next {
            JobStatus::Pending => &[],
            JobStatus::Processing => &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Completed | JobStatus::Failed => &[JobStatus::Processing],
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = GeoenrichError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(GeoenrichError::InvalidStatus(other.to_string())),
        }
    }
}

/// An enrichment job as recorded in the job status store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub input_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A freshly accepted job, not yet picked up by a worker.
    pub fn pending(id: Uuid, input_location: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: JobStatus::Pending,
            input_location: input_location.into(),
            result_location: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Processing request delivered by the job queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
    /// Object key of the uploaded CSV in the input bucket.
    pub input_location: String,
}

impl JobMessage {
    pub fn new(job_id: Uuid, input_location: impl Into<String>) -> Self {
        Self {
            job_id,
            input_location: input_location.into(),
        }
    }
}

// ============================================================================
// Resolution Types
// ============================================================================

/// Why an address did not resolve to establishment details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusTag {
    NoResultsFound,
    NearbySearchFailed,
    GetDetailsFailed,
    NoEstablishmentFound,
}

impl StatusTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusTag::NoResultsFound => "NO_RESULTS_FOUND",
            StatusTag::NearbySearchFailed => "NEARBY_SEARCH_FAILED",
            StatusTag::GetDetailsFailed => "GET_DETAILS_FAILED",
            StatusTag::NoEstablishmentFound => "NO_ESTABLISHMENT_FOUND",
        }
    }
}

impl std::fmt::Display for StatusTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business details returned by the place-details lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentDetails {
    pub name: String,
    pub formatted_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Outcome of resolving one input address; one NDJSON line of job output.
///
/// Either `details` is set, or `status_tag` and/or `error` explain the miss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EstablishmentDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_tag: Option<StatusTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolutionResult {
    pub fn resolved(
        address: impl Into<String>,
        place_id: impl Into<String>,
        details: EstablishmentDetails,
    ) -> Self {
        Self {
            address: address.into(),
            place_id: Some(place_id.into()),
            details: Some(details),
            status_tag: None,
            error: None,
        }
    }

    pub fn tagged(address: impl Into<String>, place_id: Option<String>, tag: StatusTag) -> Self {
        Self {
            address: address.into(),
            place_id,
            details: None,
            status_tag: Some(tag),
            error: None,
        }
    }

    pub fn failed(address: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            place_id: None,
            details: None,
            status_tag: None,
            error: Some(error.into()),
        }
    }

    /// Attach the underlying error message to a tagged miss.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.details.is_some()
    }
}
