//! Read-only status API
//!
//! - `GET /health`: liveness, plus a database ping when one is configured
//! - `GET /api/v1/jobs/:job_id`: current status of one job, with a
//!   presigned `download_url` once it has COMPLETED

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use geoenrich_common::types::{Job, JobStatus};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::JobStore;
use crate::storage::{split_object_url, ObjectStore};

/// Lifetime of result download links.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn JobStore>,
    /// Signs result download links.
    pub storage: Arc<dyn ObjectStore>,
    /// Pinged by `/health` when present.
    pub db: Option<PgPool>,
}

/// Success envelope: `{"success": true, "data": ...}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/jobs/:job_id", get(get_job))
        .with_state(state)
        .layer(tracing_layer())
}

fn tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

async fn health_check(State(state): State<ApiState>) -> Response {
    let Some(db) = state.db else {
        return (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response();
    };

    match sqlx::query("SELECT 1").execute(&db).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "database": "connected" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "unreachable" })),
            )
                .into_response()
        },
    }
}

/// Job record plus, for completed jobs, where to fetch the results.
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

async fn get_job(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<ApiResponse<JobView>, ApiError> {
    let job = state.store.get(job_id).await?;

    let download_url = match (job.status, job.result_location.as_deref()) {
        (JobStatus::Completed, Some(location)) => {
            let (bucket, key) = split_object_url(location).ok_or_else(|| {
                ApiError::Internal(format!("Unrecognised result location: {location}"))
            })?;
            let url = state
                .storage
                .presign_get(bucket, key, DOWNLOAD_URL_TTL)
                .await
                .map_err(|e| ApiError::Internal(format!("Failed to generate download URL: {e}")))?;
            Some(url)
        },
        _ => None,
    };

    Ok(ApiResponse::success(JobView { job, download_url }))
}
