use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Herald API",
        version = "0.1.0",
        description = "Trigger and monitor news ingestion jobs."
    ),
    paths(
        crate::routes::create_job,
        crate::routes::list_jobs,
        crate::routes::get_job,
        crate::routes::cancel_job,
        crate::routes::list_sources,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::CreateJobRequest,
        crate::dto::CreateJobResponse,
        crate::dto::CancelJobResponse,
        crate::dto::JobCountsResponse,
        crate::dto::SourceReportResponse,
        crate::dto::JobResponse,
        crate::dto::JobListResponse,
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "jobs", description = "Ingestion job lifecycle"),
        (name = "sources", description = "Source registry and circuit state"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
