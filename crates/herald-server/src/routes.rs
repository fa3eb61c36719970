use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use herald_core::job::JobStatus;
use herald_core::traits::JobStore;
use herald_core::{AppError, JobStatusReport, TriggerJobRequest};

use crate::dto::{
    CancelJobResponse, CreateJobRequest, CreateJobResponse, ErrorResponse, HealthResponse,
    JobListResponse, JobResponse, ListJobsQuery, SourceListResponse, SourceResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/jobs", get(list_jobs).post(create_job))
        .route("/v1/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/v1/sources", get(list_sources))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted and running", body = CreateJobResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = TriggerJobRequest::from(body);
    let job_id = state.orchestrator.trigger_job(request).await?;

    let response = CreateJobResponse {
        job_id,
        status: JobStatus::New.to_string(),
    };

    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

#[utoipa::path(
    get,
    path = "/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Most recent jobs first", body = JobListResponse),
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(20).min(100);
    let jobs = state.db.job_repo().list_jobs(limit).await?;
    let total = jobs.len();

    let response = JobListResponse {
        jobs: jobs
            .iter()
            .map(|job| JobResponse::from(JobStatusReport::from(job)))
            .collect(),
        total,
    };

    Ok(axum::Json(response))
}

#[utoipa::path(
    get,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Live or stored job status", body = JobResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .orchestrator
        .get_job_status(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id}")))?;

    Ok(axum::Json(JobResponse::from(report)))
}

#[utoipa::path(
    delete,
    path = "/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 202, description = "Cancellation requested", body = CancelJobResponse),
        (status = 404, description = "Not found", body = ErrorResponse),
        (status = 409, description = "Job is not running on this server", body = ErrorResponse),
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if state.orchestrator.cancel_job(id).await {
        let response = CancelJobResponse {
            job_id: id,
            cancelling: true,
        };
        return Ok((StatusCode::ACCEPTED, axum::Json(response)).into_response());
    }

    let job = state
        .db
        .job_repo()
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job {id}")))?;

    let message = if job.status.is_terminal() {
        format!("Job {id} is already in terminal state: {}", job.status)
    } else {
        format!("Job {id} is {} but not running on this server", job.status)
    };
    let body = ErrorResponse {
        error: "conflict".to_string(),
        message,
    };
    Ok((StatusCode::CONFLICT, axum::Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/sources",
    responses(
        (status = 200, description = "Sources with circuit state", body = SourceListResponse),
    ),
    tag = "sources"
)]
pub async fn list_sources(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let sources = state.sources.list_sources().await?;

    let response = SourceListResponse {
        sources: sources.into_iter().map(SourceResponse::from).collect(),
    };

    Ok(axum::Json(response))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let healthy = state.db.health_check().await.is_ok();

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" },
        database: if healthy { "ok" } else { "error" },
        active_jobs: state.orchestrator.active_jobs().len(),
    };

    (status, axum::Json(response))
}
