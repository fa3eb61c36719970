use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tower::ServiceExt;

use herald_client::AlertTarget;
use herald_core::circuit_breaker::CircuitBreaker;
use herald_core::recovery::RetryPolicy;
use herald_core::throttle::ThrottleConfig;
use herald_core::traits::TracingAlertSink;
use herald_core::{OrchestratorConfig, SourceDefinition};
use herald_db::Database;
use herald_server::routes;
use herald_server::state::{AppState, ServerSettings};

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _container: ContainerAsync<GenericImage>,
}

/// Fast settings: no politeness delay, millisecond backoff, private
/// addresses allowed so sources can point at the local fixture site.
fn test_settings() -> ServerSettings {
    ServerSettings {
        orchestrator: OrchestratorConfig {
            politeness: ThrottleConfig::new(Duration::ZERO),
            fetch_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default()
                .with_base_delay(Duration::from_millis(1))
                .without_jitter(),
            ..Default::default()
        },
        breaker: CircuitBreaker::default(),
        alerts: AlertTarget::Log(TracingAlertSink),
        allow_private_urls: true,
    }
}

pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "herald_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/herald_test");
    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let state = Arc::new(AppState::new(db.clone(), test_settings()).expect("state"));

    TestApp {
        router: routes::router(state),
        db,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}

impl TestApp {
    pub async fn add_source(&self, id: &str, feed_url: &str) {
        let definition: SourceDefinition = serde_json::from_value(serde_json::json!({
            "id": id,
            "feed_url": feed_url,
        }))
        .unwrap();
        self.db
            .source_repo(CircuitBreaker::default())
            .upsert_source(&definition)
            .await
            .unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> (Response<Body>, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (Response::from_parts(parts, Body::empty()), json)
    }

    pub async fn get(&self, uri: &str) -> (Response<Body>, serde_json::Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_job(&self, body: serde_json::Value) -> (Response<Body>, serde_json::Value) {
        self.send(
            Request::post("/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
    }

    /// Polls until the job is terminal and no longer running, then returns
    /// the stored report.
    pub async fn wait_for_terminal(&self, job_id: &str) -> serde_json::Value {
        for _ in 0..300 {
            let (_, health) = self.get("/health").await;
            let (_, json) = self.get(&format!("/v1/jobs/{job_id}")).await;
            let finished = matches!(
                json["status"].as_str(),
                Some("successful" | "partial" | "failed")
            );
            if finished && health["active_jobs"] == 0 {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job {job_id} did not finish");
    }
}
