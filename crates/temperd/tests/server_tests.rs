//! Integration tests for the metrics snapshot endpoint

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use temper_lib::{
    models::{GpuTelemetry, InferenceStatus, MetricsDocument},
    server::{create_router, ServerState, SnapshotStore},
};
use tower::ServiceExt;

const TOKEN: &str = "s3cret";

async fn setup_test_app(token: Option<&str>) -> (Router, Arc<SnapshotStore>) {
    let store = Arc::new(SnapshotStore::new());
    let state = ServerState::new(store.clone(), token.map(str::to_string));
    (create_router(state), store)
}

fn sample_document() -> MetricsDocument {
    let mut doc = MetricsDocument {
        timestamp: 1_700_000_000,
        ..MetricsDocument::default()
    };
    doc.ai_service.status = InferenceStatus::Ready;
    doc.ai_service.model = Some("llama-3-70b".to_string());
    doc.gpus.push(GpuTelemetry {
        index: 0,
        name: "NVIDIA RTX 6000 Ada".to_string(),
        temperature: 64,
        fan_speed_percent: 55,
        ..GpuTelemetry::default()
    });
    doc
}

async fn body_bytes(response: axum::response::Response) -> axum::body::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_serves_published_document() {
    let (app, store) = setup_test_app(None).await;
    store.publish(&sample_document()).await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    let declared: usize = response
        .headers()
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let body = body_bytes(response).await;
    assert_eq!(declared, body.len());

    let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(doc["timestamp"], 1_700_000_000);
    assert_eq!(doc["ai_service"]["status"], "READY");
    assert_eq!(doc["gpus"][0]["temperature"], 64);
    assert_eq!(doc["chassis"]["ipmi_available"], false);
}

#[tokio::test]
async fn test_every_path_serves_snapshot() {
    let (app, _store) = setup_test_app(None).await;

    for path in ["/", "/metrics", "/api/v1/anything?x=1"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "path {path}");
    }
}

#[tokio::test]
async fn test_default_document_before_first_publish() {
    let (app, _store) = setup_test_app(None).await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();

    assert_eq!(doc["ai_service"]["status"], "OFFLINE");
    assert!(doc["gpus"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_secret_is_rejected() {
    let (app, store) = setup_test_app(Some(TOKEN)).await;
    store.publish(&sample_document()).await;

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get("connection").unwrap(), "close");

    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let (app, _store) = setup_test_app(Some(TOKEN)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("X-API-Key", "guess")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_key_header_is_accepted() {
    let (app, _store) = setup_test_app(Some(TOKEN)).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("X-API-Key", TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_token_is_accepted() {
    let (app, _store) = setup_test_app(Some(TOKEN)).await;

    for scheme in ["Bearer", "bearer"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("Authorization", format!("{scheme} {TOKEN}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_post_is_not_allowed() {
    let (app, _store) = setup_test_app(None).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "GET, HEAD");
}
