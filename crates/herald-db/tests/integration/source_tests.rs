use std::time::Duration;

use herald_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use herald_core::error::{AppError, ErrorCategory, Severity};
use herald_core::source::{SourceDefinition, SourceOutcome};
use herald_core::traits::SourceRegistry;

use crate::integration::common::setup_test_db;

fn definition(id: &str, enabled: bool) -> SourceDefinition {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "feed_url": format!("https://{id}.example/news"),
        "config": { "request_delay_ms": 250, "link_selector": "h2 a" },
        "enabled": enabled,
    }))
    .unwrap()
}

fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: threshold,
        cooldown,
        ..Default::default()
    })
}

const TIMEOUT: SourceOutcome = SourceOutcome::Failure {
    category: ErrorCategory::Timeout,
    severity: Severity::High,
};

#[tokio::test]
async fn only_enabled_sources_are_eligible() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo(CircuitBreaker::default());
    repo.upsert_source(&definition("planet", true)).await.unwrap();
    repo.upsert_source(&definition("gazette", false)).await.unwrap();

    let eligible = repo.list_eligible_sources().await.unwrap();
    assert_eq!(eligible.len(), 1);
    assert_eq!(eligible[0].id, "planet");
    assert_eq!(eligible[0].name, "planet");
    assert_eq!(eligible[0].config.request_delay_ms, Some(250));
    assert_eq!(eligible[0].config.link_selector.as_deref(), Some("h2 a"));
    assert_eq!(eligible[0].circuit.state, CircuitState::Closed);

    assert_eq!(repo.list_sources().await.unwrap().len(), 2);
}

#[tokio::test]
async fn failures_open_circuit_and_survive_redefinition() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo(breaker(3, Duration::from_secs(600)));
    repo.upsert_source(&definition("planet", true)).await.unwrap();

    for _ in 0..3 {
        repo.report_source_outcome("planet", TIMEOUT).await.unwrap();
    }
    // Redefining the source keeps its circuit.
    repo.upsert_source(&definition("planet", true)).await.unwrap();

    let source = repo.list_eligible_sources().await.unwrap().remove(0);
    assert_eq!(source.circuit.state, CircuitState::Open);
    assert_eq!(source.circuit.failure_count, 3);
    assert!(source.circuit.opened_at.is_some());
}

#[tokio::test]
async fn elapsed_cooldown_lists_half_open_and_success_closes() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo(breaker(1, Duration::ZERO));
    repo.upsert_source(&definition("planet", true)).await.unwrap();

    repo.report_source_outcome("planet", TIMEOUT).await.unwrap();
    let source = repo.list_eligible_sources().await.unwrap().remove(0);
    assert_eq!(source.circuit.state, CircuitState::HalfOpen);

    repo.report_source_outcome("planet", SourceOutcome::Success)
        .await
        .unwrap();
    let source = repo.list_eligible_sources().await.unwrap().remove(0);
    assert_eq!(source.circuit.state, CircuitState::Closed);
    assert_eq!(source.circuit.failure_count, 0);
}

#[tokio::test]
async fn concurrent_reports_are_not_lost() {
    let (db, _container) = setup_test_db().await;
    let repo = db.source_repo(breaker(100, Duration::from_secs(600)));
    repo.upsert_source(&definition("planet", true)).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.report_source_outcome("planet", TIMEOUT).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let source = repo.list_eligible_sources().await.unwrap().remove(0);
    assert_eq!(source.circuit.failure_count, 8);
}

#[tokio::test]
async fn unknown_source_is_not_found() {
    let (db, _container) = setup_test_db().await;
    let err = db
        .source_repo(CircuitBreaker::default())
        .report_source_outcome("missing", SourceOutcome::Success)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
