//! HTTP API tests

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

use deployer::config::{Config, DeploymentTarget};
use deployer::queue::{JobQueue, ManualClock};
use deployer::receiver::Receiver;
use deployer::server::serve::router;
use deployer::server::state::ServerState;

const SECRET: &str = "s3cret";

fn app() -> (Router, Arc<JobQueue>) {
    let mut config = Config::with_targets(vec![
        DeploymentTarget::new("staging", "app:*"),
        DeploymentTarget::new("prod", "app:*"),
    ])
    .unwrap();
    config.trigger_secret = Some(SecretString::from(SECRET.to_string()));
    let config = Arc::new(config);
    let queue = Arc::new(JobQueue::in_memory(
        config.clone(),
        Arc::new(ManualClock::default()),
    ));
    let receiver = Arc::new(Receiver::new(config.clone(), queue.clone()));
    let state = ServerState::new(config, queue.clone(), receiver);
    (router(Arc::new(state)), queue)
}

fn trigger(body: &str, credential: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/triggers")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(credential) = credential {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", credential));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_trigger_then_query() {
    let (app, _) = app();
    let body = r#"{"target": "staging", "image_ref": "app:1.2"}"#;

    let response = app
        .clone()
        .oneshot(trigger(body, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = json(response).await;
    assert_eq!(accepted["deduplicated"], false);
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(get(&format!("/api/v1/jobs/{}", job_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json(response).await;
    assert_eq!(status["state"], "pending");
    assert_eq!(status["target"], "staging");
    assert_eq!(status["attempt_count"], 0);

    let response = app
        .clone()
        .oneshot(get("/api/v1/targets/staging/jobs"))
        .await
        .unwrap();
    assert_eq!(json(response).await["total"], 1);

    let response = app.oneshot(get("/api/v1/targets")).await.unwrap();
    let targets = json(response).await;
    assert_eq!(targets["total"], 2);
    assert_eq!(targets["targets"][0]["name"], "staging");
    assert_eq!(targets["targets"][0]["pending"], 1);
}

#[tokio::test]
async fn test_trigger_errors_map_to_status_codes() {
    let (app, queue) = app();

    let response = app
        .clone()
        .oneshot(trigger(r#"{"target": "staging", "image_ref": "app:1"}"#, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json(response).await["code"], "authentication");

    let response = app
        .clone()
        .oneshot(trigger(r#"{"target": "staging"}"#, Some(SECRET)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "validation");

    let response = app
        .clone()
        .oneshot(trigger(
            r#"{"target": "qa", "image_ref": "app:1"}"#,
            Some(SECRET),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json(response).await["code"], "unknown_target");

    assert!(queue.jobs_for_target("staging").await.is_empty());
}

#[tokio::test]
async fn test_unknown_jobs_and_targets() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(get("/api/v1/jobs/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/v1/jobs/{}",
            deployer::queue::JobId::new()
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get("/api/v1/targets/qa/jobs"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
