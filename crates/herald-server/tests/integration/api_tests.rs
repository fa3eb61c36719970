use axum::body::Body;
use axum::http::{Request, StatusCode};

use crate::integration::common::setup_test_app;
use crate::integration::fixture::spawn_site;

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let (response, json) = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
    assert_eq!(json["active_jobs"], 0);
}

#[tokio::test]
async fn job_runs_to_completion() {
    let app = setup_test_app().await;
    let site = spawn_site().await;
    app.add_source("planet", &format!("{site}/news")).await;

    let (response, json) = app
        .post_job(serde_json::json!({"sources": ["planet"], "articles_per_source": 5}))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json["status"], "new");
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let report = app.wait_for_terminal(&job_id).await;
    assert_eq!(report["status"], "successful");
    assert_eq!(report["counts"]["attempted"], 2);
    assert_eq!(report["counts"]["scraped"], 2);
    assert_eq!(report["sources"][0]["source_id"], "planet");
    assert_eq!(report["sources"][0]["status"], "succeeded");
    assert!(report["completed_at"].is_string());

    let (_, list) = app.get("/v1/jobs").await;
    assert_eq!(list["total"], 1);
    assert_eq!(list["jobs"][0]["job_id"], job_id.as_str());

    let (_, sources) = app.get("/v1/sources").await;
    assert_eq!(sources["sources"][0]["circuit_state"], "closed");
}

#[tokio::test]
async fn second_job_reports_duplicates() {
    let app = setup_test_app().await;
    let site = spawn_site().await;
    app.add_source("planet", &format!("{site}/news")).await;
    let body = serde_json::json!({"sources": ["planet"], "articles_per_source": 5});

    let (_, first) = app.post_job(body.clone()).await;
    app.wait_for_terminal(first["job_id"].as_str().unwrap()).await;

    let (_, second) = app.post_job(body).await;
    let report = app.wait_for_terminal(second["job_id"].as_str().unwrap()).await;
    assert_eq!(report["counts"]["scraped"], 0);
    assert_eq!(report["counts"]["duplicates"], 2);
}

#[tokio::test]
async fn invalid_job_request_returns_400() {
    let app = setup_test_app().await;

    let (response, json) = app
        .post_job(serde_json::json!({"sources": [], "articles_per_source": 5}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");

    let (response, _) = app
        .post_job(serde_json::json!({"sources": ["planet"], "articles_per_source": 0}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let app = setup_test_app().await;

    let (response, _) = app.post_job(serde_json::json!({"sources": ["planet"]})).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;
    let id = uuid::Uuid::new_v4();

    let (response, json) = app.get(&format!("/v1/jobs/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "not_found");

    let (response, _) = app
        .send(
            Request::delete(format!("/v1/jobs/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_running_job_then_conflict() {
    let app = setup_test_app().await;
    let site = spawn_site().await;
    app.add_source("slow", &format!("{site}/slow-news")).await;

    let (_, json) = app
        .post_job(serde_json::json!({"sources": ["slow"], "articles_per_source": 2}))
        .await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    // Wait for the fetches to be in flight.
    for _ in 0..100 {
        let (_, status) = app.get(&format!("/v1/jobs/{job_id}")).await;
        if status["counts"]["attempted"].as_u64().unwrap_or(0) > 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    let delete = || {
        Request::delete(format!("/v1/jobs/{job_id}"))
            .body(Body::empty())
            .unwrap()
    };
    let (response, json) = app.send(delete()).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json["cancelling"], true);

    let report = app.wait_for_terminal(&job_id).await;
    assert_ne!(report["status"], "successful");

    let (response, json) = app.send(delete()).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json["error"], "conflict");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let app = setup_test_app().await;
    let sources: Vec<String> = (0..10_000).map(|i| format!("source-{i:06}")).collect();

    let (response, _) = app
        .post_job(serde_json::json!({"sources": sources, "articles_per_source": 1}))
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = setup_test_app().await;

    let (response, json) = app.get("/api-docs/openapi.json").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json["info"]["title"], "Herald API");
    assert!(json["paths"]["/v1/jobs/{id}"].is_object());
}
