use herald_core::error::{AppError, ErrorCategory};
use herald_core::job::{
    ErrorSummary, Job, JobCounts, JobOutcome, JobProgress, JobStatus, SourceReport, SourceStatus,
    TriggerJobRequest,
};
use herald_core::traits::JobStore;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn new_job() -> Job {
    let request = TriggerJobRequest::new(vec!["planet".into(), "gazette".into()], 5);
    Job::new(Uuid::new_v4(), &request)
}

fn progress(scraped: u64, errors: u64) -> JobProgress {
    let mut error_summary = ErrorSummary::new();
    if errors > 0 {
        error_summary.insert(ErrorCategory::Network, errors);
    }
    JobProgress {
        counts: JobCounts {
            attempted: scraped + errors,
            scraped,
            errors,
            ..Default::default()
        },
        error_summary,
    }
}

#[tokio::test]
async fn create_and_read_back() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = new_job();
    repo.create_job(&job).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::New);
    assert_eq!(stored.sources_requested, ["planet", "gazette"]);
    assert_eq!(stored.articles_per_source, 5);
    assert!(stored.started_at.is_none());
    assert!(stored.error_summary.is_empty());

    let err = repo.create_job(&job).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    assert!(repo.get_job(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn lifecycle_moves_forward_only() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = new_job();
    repo.create_job(&job).await.unwrap();

    repo.transition_job(job.id, JobStatus::InProgress).await.unwrap();
    repo.record_progress(job.id, &progress(2, 1)).await.unwrap();

    let running = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::InProgress);
    assert!(running.started_at.is_some());
    assert_eq!(running.total_articles_scraped, 2);
    assert_eq!(running.error_summary.get(&ErrorCategory::Network), Some(&1));

    let outcome = JobOutcome {
        status: JobStatus::Partial,
        progress: progress(3, 1),
        source_reports: vec![
            SourceReport::new("planet", SourceStatus::Degraded),
            SourceReport::new("gazette", SourceStatus::Skipped).with_message("circuit-open"),
        ],
        message: None,
    };
    repo.finalize_job(job.id, &outcome).await.unwrap();

    let done = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Partial);
    assert_eq!(done.candidates_attempted, 4);
    assert!(done.completed_at.is_some());
    assert_eq!(done.source_reports, outcome.source_reports);

    let err = repo
        .transition_job(job.id, JobStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InvalidTransition { from: "partial", to: "in-progress" }
    ));
    let err = repo.record_progress(job.id, &progress(9, 0)).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTransition { .. }));
}

#[tokio::test]
async fn new_job_may_fail_directly() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = new_job();
    repo.create_job(&job).await.unwrap();

    let outcome = JobOutcome {
        status: JobStatus::Failed,
        progress: JobProgress::default(),
        source_reports: Vec::new(),
        message: Some("No eligible sources".into()),
    };
    repo.finalize_job(job.id, &outcome).await.unwrap();

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.message.as_deref(), Some("No eligible sources"));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (db, _container) = setup_test_db().await;
    let err = db
        .job_repo()
        .transition_job(Uuid::new_v4(), JobStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn list_jobs_newest_first() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let mut older = new_job();
    older.triggered_at -= chrono::TimeDelta::minutes(5);
    let newer = new_job();
    repo.create_job(&older).await.unwrap();
    repo.create_job(&newer).await.unwrap();

    let jobs = repo.list_jobs(10).await.unwrap();
    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), [newer.id, older.id]);
    assert_eq!(repo.list_jobs(1).await.unwrap().len(), 1);
}
