//! API route tests against a full in-memory controller.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use glide_core::GlideConfig;
use glidepath_api::build_router;
use glidepath_controller::{Clock, RolloutController};
use glidepath_health::{HealthEvaluator, ProbeFn, ProbeResult, ProbeTarget};
use glidepath_state::StateStore;
use glidepath_traffic::TrafficController;

const ROLLOUT: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Rollout
metadata:
  name: front-end
  namespace: shop
spec:
  selector:
    matchLabels:
      app: front-end
  template:
    metadata:
      labels:
        app: front-end
    spec:
      containers:
        - name: front-end
          image: IMAGE
          ports:
            - containerPort: 8079
  strategy:
    canary:
      steps:
        - setWeight: 25
        - pause: {}
        - setWeight: 75
"#;

fn test_router() -> Router {
    let prober: ProbeFn = Arc::new(|_target: ProbeTarget| {
        Box::pin(async { ProbeResult::Healthy }) as Pin<Box<dyn Future<Output = ProbeResult> + Send>>
    });
    let store = StateStore::open_in_memory().unwrap();
    let traffic = TrafficController::new(store.clone());
    let controller = RolloutController::with_clock(
        store,
        traffic,
        HealthEvaluator::new().with_prober(prober),
        GlideConfig::default(),
        Clock::starting_at(1_700_000_000_000),
    );
    build_router(controller)
}

async fn send(router: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, "GET", uri, "").await
}

async fn wait_for_phase(router: &Router, phase: &str) -> Value {
    for _ in 0..300 {
        let (_, body) = get(router, "/api/v1/rollouts/shop%2Ffront-end").await;
        if body["data"]["phase"] == phase {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("rollout never reached {phase}");
}

#[tokio::test(start_paused = true)]
async fn healthz_reports_ok() {
    let router = test_router();
    let (status, body) = get(&router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test(start_paused = true)]
async fn list_is_empty_initially() {
    let router = test_router();
    let (status, body) = get(&router, "/api/v1/rollouts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], serde_json::json!([]));
}

#[tokio::test(start_paused = true)]
async fn submit_then_inspect() {
    let router = test_router();
    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/rollouts",
        &ROLLOUT.replace("IMAGE", "front-end:1"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"][0]["workload_id"], "shop/front-end");
    assert_eq!(body["data"][0]["current_revision"], 1);

    let done = wait_for_phase(&router, "complete").await;
    assert_eq!(done["canary_weight"], 100);

    let (status, body) = get(&router, "/api/v1/rollouts/shop%2Ffront-end/traffic").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["mode"], "weighted");
    assert_eq!(body["data"]["stable"], 1);

    let (status, body) = get(&router, "/api/v1/rollouts/shop%2Ffront-end/revisions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["generation"], 1);
    assert_eq!(body["data"][0]["image"], "front-end:1");

    let (_, body) = get(&router, "/api/v1/rollouts").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn indefinite_pause_resumes_via_api() {
    let router = test_router();
    send(&router, "POST", "/api/v1/rollouts", &ROLLOUT.replace("IMAGE", "front-end:1")).await;
    wait_for_phase(&router, "complete").await;

    send(&router, "POST", "/api/v1/rollouts", &ROLLOUT.replace("IMAGE", "front-end:2")).await;
    let paused = wait_for_phase(&router, "paused").await;
    assert_eq!(paused["canary_weight"], 25);
    assert_eq!(paused["pause"]["reason"], "step");

    let (status, _) = send(&router, "POST", "/api/v1/rollouts/shop%2Ffront-end/resume", "").await;
    assert_eq!(status, StatusCode::OK);
    let done = wait_for_phase(&router, "complete").await;
    assert_eq!(done["current_revision"], 2);
    assert_eq!(done["stable_revision"], 1);
}

#[tokio::test(start_paused = true)]
async fn abort_with_reason() {
    let router = test_router();
    send(&router, "POST", "/api/v1/rollouts", &ROLLOUT.replace("IMAGE", "front-end:1")).await;
    wait_for_phase(&router, "complete").await;
    send(&router, "POST", "/api/v1/rollouts", &ROLLOUT.replace("IMAGE", "front-end:2")).await;
    wait_for_phase(&router, "paused").await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/rollouts/shop%2Ffront-end/abort",
        r#"{"reason":"error rate too high"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["phase"], "rolled_back");
    assert_eq!(body["data"]["message"], "error rate too high");
    assert_eq!(body["data"]["canary_weight"], 0);

    let (_, body) = get(&router, "/api/v1/rollouts/shop%2Ffront-end/traffic").await;
    assert_eq!(body["data"]["stable"], 1);
    assert_eq!(body["data"]["canary"], Value::Null);

    let (status, body) = get(&router, "/api/v1/rollouts/shop%2Ffront-end/history").await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["current_revision"], 1);
    assert_eq!(history[0]["phase"], "complete");
    assert_eq!(history[1]["current_revision"], 2);
    assert_eq!(history[1]["phase"], "rolled_back");
    assert_eq!(history[1]["message"], "error rate too high");
}

#[tokio::test(start_paused = true)]
async fn unknown_rollout_is_404() {
    let router = test_router();
    for uri in [
        "/api/v1/rollouts/shop%2Fmissing",
        "/api/v1/rollouts/shop%2Fmissing/traffic",
        "/api/v1/rollouts/shop%2Fmissing/revisions",
        "/api/v1/rollouts/shop%2Fmissing/history",
    ] {
        let (status, body) = get(&router, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("shop/missing"));
    }
    let (status, _) = send(&router, "POST", "/api/v1/rollouts/shop%2Fmissing/resume", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn invalid_documents_are_400() {
    let router = test_router();

    let (status, body) = send(&router, "POST", "/api/v1/rollouts", "kind: Service\n").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let bad_weight = ROLLOUT
        .replace("IMAGE", "front-end:1")
        .replace("setWeight: 75", "setWeight: 175");
    let (status, body) = send(&router, "POST", "/api/v1/rollouts", &bad_weight).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("setWeight"));

    let (status, _) = send(
        &router,
        "POST",
        "/api/v1/rollouts/shop%2Ffront-end/abort",
        "not json",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
