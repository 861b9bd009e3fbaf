mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::memory_harness;
use tower::ServiceExt; // for `oneshot`

#[tokio::test]
async fn root_responds_ok() {
    let (harness, _) = memory_harness();
    let response = harness
        .app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "Deploy Relay API".as_bytes());
}

#[tokio::test]
async fn status_starts_empty() {
    let (harness, _) = memory_harness();
    let (status, snapshot) = common::get(&harness.app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot, serde_json::json!({"inFlight": [], "clusters": {}}));
}
