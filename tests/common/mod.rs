//! Shared helpers for the integration tests
#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use quality_gate::config::{Config, QualityGateDefinition};
use quality_gate::models::OpenApiCriterion;
use quality_gate::server::{build_pipeline, create_pool, create_router};
use quality_gate::signals::ShutdownSignal;
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::broadcast;
use tower::ServiceExt;

pub struct TestService {
    pub app: Router,
    pub pool: SqlitePool,
    pub shutdown: broadcast::Sender<ShutdownSignal>,
    pub workers: Vec<tokio::task::JoinHandle<()>>,
}

impl TestService {
    pub async fn stop(self) {
        let _ = self.shutdown.send(ShutdownSignal::Graceful);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Configuration with a `strict` gate and short report timings
pub fn test_config(index_url: Option<String>) -> Config {
    let mut config = Config::default();
    config.coverage.database_path = ":memory:".to_string();
    config.spec_index.base_url = index_url;
    config.spec_index.timeout_seconds = 2;
    config.spec_index.max_retries = 0;
    config.reports.sweep_interval = Duration::from_millis(50);
    config.reports.outbox_poll_interval = Duration::from_millis(50);
    config.quality_gates = vec![QualityGateDefinition {
        name: "strict".to_string(),
        criteria: vec![
            OpenApiCriterion::PathCoverage,
            OpenApiCriterion::ResponseCodeCoverage,
        ],
    }];
    config
}

pub async fn start(config: Config) -> TestService {
    let pool = create_pool(&config.coverage.database_path).await.unwrap();
    let (shutdown, _) = broadcast::channel(4);
    let (state, workers) = build_pipeline(&config, pool.clone(), &shutdown).await.unwrap();
    TestService {
        app: create_router(state, None),
        pool,
        shutdown,
        workers,
    }
}

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Poll `GET /reports/{id}` until it answers 200
pub async fn wait_for_report(app: &Router, calculation_id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(app, "GET", &format!("/reports/{}", calculation_id), None).await;
        if status == StatusCode::OK {
            return body;
        }
        assert_eq!(status, StatusCode::ACCEPTED);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("report {} never completed", calculation_id);
}

pub async fn stored_span_count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM telemetry_spans")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Poll the store until `expected` spans were written
pub async fn wait_for_spans(pool: &SqlitePool, expected: i64) {
    for _ in 0..100 {
        if stored_span_count(pool).await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected {} stored spans, found {}", expected, stored_span_count(pool).await);
}
