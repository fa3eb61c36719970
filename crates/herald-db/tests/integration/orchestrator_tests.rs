use std::time::Duration;

use herald_core::circuit_breaker::CircuitBreaker;
use herald_core::config::OrchestratorConfig;
use herald_core::job::{JobStatus, TriggerJobRequest};
use herald_core::orchestrator::{Collaborators, Orchestrator};
use herald_core::recovery::RetryPolicy;
use herald_core::source::SourceDefinition;
use herald_core::testutil::{
    MockCandidateProvider, MockExtractor, MockFetcher, MockResponse, RecordingAlertSink,
};
use herald_core::throttle::ThrottleConfig;
use herald_core::traits::JobStore;

use crate::integration::common::setup_test_db;

fn article(topic: &str) -> String {
    format!(
        "<p>Reporters covered the {topic} story in depth, interviewing residents \
         and officials about what the decision means for the valley.</p>"
    )
}

/// Full job against the Postgres stores: a second run of the same
/// listing only produces duplicates.
#[tokio::test]
async fn rerun_against_postgres_only_finds_duplicates() {
    let (db, _container) = setup_test_db().await;
    let sources = db.source_repo(CircuitBreaker::default());
    let definition: SourceDefinition = serde_json::from_value(serde_json::json!({
        "id": "planet",
        "feed_url": "https://planet.example/news",
    }))
    .unwrap();
    sources.upsert_source(&definition).await.unwrap();

    let urls = ["https://planet.example/dam", "https://planet.example/bridge"];
    let fetcher = MockFetcher::default()
        .respond(urls[0], vec![MockResponse::Html(article("dam"))])
        .respond(urls[1], vec![MockResponse::Html(article("bridge"))]);

    let orchestrator = Orchestrator::new(
        Collaborators {
            fetcher,
            provider: MockCandidateProvider::new().with_urls("planet", &urls),
            extractor: MockExtractor::default(),
            content: db.content_repo(),
            jobs: db.job_repo(),
            sources,
            events: db.event_repo(),
            alerts: RecordingAlertSink::new(),
        },
        OrchestratorConfig {
            politeness: ThrottleConfig::new(Duration::ZERO),
            retry: RetryPolicy::default()
                .with_base_delay(Duration::from_millis(1))
                .without_jitter(),
            ..Default::default()
        },
    );
    let request = TriggerJobRequest::new(vec!["planet".into()], 10);

    let first = orchestrator.run_job(request.clone()).await.unwrap();
    assert_eq!(first.status, JobStatus::Successful);
    assert_eq!(first.counts.scraped, 2);

    let second = orchestrator.run_job(request).await.unwrap();
    assert_eq!(second.counts.scraped, 0);
    assert_eq!(second.counts.duplicates, 2);
    assert!(second.counts.is_balanced());

    let stored = db.job_repo().get_job(second.job_id).await.unwrap().unwrap();
    assert_eq!(stored.status, second.status);
    assert_eq!(stored.total_duplicates, 2);
    assert_eq!(db.content_repo().count().await.unwrap(), 2);
    assert!(!db.event_repo().list_for_job(first.job_id, 100).await.unwrap().is_empty());
}
