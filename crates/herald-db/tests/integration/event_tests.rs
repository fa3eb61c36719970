use herald_core::job::{Job, TriggerJobRequest};
use herald_core::traits::{EventLevel, EventSink, JobStore};
use uuid::Uuid;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn events_are_appended_in_order() {
    let (db, _container) = setup_test_db().await;
    let job = Job::new(
        Uuid::new_v4(),
        &TriggerJobRequest::new(vec!["planet".into()], 3),
    );
    db.job_repo().create_job(&job).await.unwrap();

    let events = db.event_repo();
    events
        .append_structured_event(job.id, EventLevel::Info, "Job started", serde_json::json!({"sources": 1}))
        .await
        .unwrap();
    events
        .append_structured_event(job.id, EventLevel::Warn, "Candidate failed", serde_json::json!({"category": "timeout"}))
        .await
        .unwrap();

    let stored = events.list_for_job(job.id, 10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].message, "Job started");
    assert_eq!(stored[1].level, "warn");
    assert_eq!(stored[1].data["category"], "timeout");
    assert!(events.list_for_job(Uuid::new_v4(), 10).await.unwrap().is_empty());
}
