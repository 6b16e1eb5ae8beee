//! HTTP surface driven in-process

mod common;

use std::sync::Arc;

use arrstack::server::{router, ServerState};
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceExt;

fn app(harness: &Harness) -> Router {
    router(Arc::new(ServerState::new(harness.orchestrator.clone())))
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn test_health() {
    let harness = HarnessBuilder::default().build();
    let (status, body) = send_json(app(&harness), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_validate_empty_pool() {
    let harness = HarnessBuilder::default().build();
    let (status, body) = send_json(
        app(&harness),
        post("/api/validate", &json!({ "paths": { "pool": "" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert_eq!(body["checks"]["pool"], "required");
}

#[tokio::test]
async fn test_setup_verify_partial() {
    let harness = HarnessBuilder::default().build();
    let request = json!({
        "config": { "runtime": { "puid": 1000 } },
        "partial": true,
        "skip_service_checks": true
    });
    let (status, body) = send_json(app(&harness), post("/api/setup/verify", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["success"], true);
    assert!(body["result"]["client_side_rules"].as_array().unwrap().len() > 1);
    assert!(body["next_steps"].as_array().is_some());
    assert!(body["estimated_time"].as_str().unwrap().starts_with("about"));
}

#[tokio::test]
async fn test_apply_rejects_invalid_config() {
    let harness = HarnessBuilder::default().build();
    let (status, body) = send_json(
        app(&harness),
        post("/api/apply", &json!({ "paths": { "pool": "" } })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["ok"], false);
    assert!(body["run_id"].is_null());
    assert_eq!(body["errors"][0]["field"], "paths.pool");
}

#[tokio::test]
async fn test_apply_conflict() {
    let gate = Arc::new(Notify::new());
    let harness = HarnessBuilder {
        deployer: FakeDeployer {
            gate: Some(gate.clone()),
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let (status, first) = send_json(app(&harness), post("/api/apply", &valid_config())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["ok"], true);
    let run_id = first["run_id"].as_str().unwrap().to_string();

    let (status, second) = send_json(app(&harness), post("/api/apply", &valid_config())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["error"], "conflict");
    assert_eq!(second["details"]["run_id"], run_id.as_str());

    gate.notify_one();
    collect(harness.orchestrator.subscribe(&run_id).unwrap()).await;
}

#[tokio::test]
async fn test_event_stream_replays_completed_run() {
    let harness = HarnessBuilder::default().build();
    let run_id = harness.orchestrator.apply(valid_config()).await.unwrap();
    collect(harness.orchestrator.subscribe(&run_id).unwrap()).await;

    let (status, body) = send(app(&harness), get(&format!("/api/runs/{}/events", run_id))).await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(names.len(), 11);
    assert!(names[..10].iter().all(|n| *n == "stage"));
    assert_eq!(names[10], "status");
    assert!(body.contains(r#"data: {"stage":"validate","status":"running""#));
    assert!(body.contains(r#""ok":true"#));
}

#[tokio::test]
async fn test_unknown_run() {
    let harness = HarnessBuilder::default().build();
    let (status, body) = send_json(app(&harness), get("/api/runs/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = send(app(&harness), get("/api/runs/nope/events")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_recent_runs_and_preview() {
    let harness = HarnessBuilder::default().build();
    let run_id = harness.orchestrator.apply(valid_config()).await.unwrap();
    collect(harness.orchestrator.subscribe(&run_id).unwrap()).await;

    let (status, body) = send_json(app(&harness), get("/api/runs/recent?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["runs"][0]["run_id"], run_id.as_str());
    assert_eq!(body["runs"][0]["ok"], true);

    let (status, body) = send_json(app(&harness), get(&format!("/api/runs/{}", run_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"].as_array().unwrap().len(), 10);

    // Baseline is now the applied config
    let mut next = valid_config();
    next["services"]["sonarr"]["settings"] = json!({ "language": "de" });
    let (status, body) = send_json(app(&harness), post("/api/preview", &next)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["services_to_reconfigure"], json!(["sonarr"]));
    assert_eq!(body["services_to_restart"], json!([]));
}
