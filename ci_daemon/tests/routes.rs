//! HTTP surface tests through `tower::ServiceExt::oneshot`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use autograder_ci::config::{CiConfig, CourseRegistry};
use autograder_ci::models::build::BuildResult;
use autograder_ci::models::owner::OwnerKey;
use autograder_ci::routes::api::{ApproveResponse, LabSummary};
use autograder_ci::routes::{ci_router, CiRouterState};
use autograder_ci::services::recorder::UNEXPECTED_END;
use autograder_ci::store::Storage;

use common::Harness;

const WEBHOOK_SECRET: &str = "hook-secret";

const COURSES: &str = r#"[
    {
        "name": "cs101",
        "admin_token": "tok",
        "base_path": "work",
        "secret": "sec",
        "individual_labs": ["lab1", "lab2"],
        "group_labs": ["glab1"],
        "members": ["alice"],
        "groups": {"group3": 3}
    }
]"#;

fn app(h: &Harness) -> Router {
    let config = CiConfig {
        github_webhook_secret: WEBHOOK_SECRET.to_string(),
        ..CiConfig::default()
    };
    ci_router(CiRouterState {
        daemon: h.daemon.clone(),
        courses: Arc::new(CourseRegistry::from_json(COURSES).unwrap()),
        config,
    })
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn webhook(event: &str, body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/webhook/github")
        .header("x-github-event", event)
        .header("x-hub-signature-256", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn wait_for_build(h: &Harness, id: i64) -> BuildResult {
    for _ in 0..200 {
        if let Some(result) = h.daemon.store().build(id).await.unwrap() {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("build {id} was never recorded");
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(Duration::from_secs(10));
    let resp = app(&h).oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_result_is_not_found() {
    let h = Harness::new(Duration::from_secs(10));
    let resp = app(&h).oneshot(get("/api/results/999")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trigger_validates_course_user_and_lab() {
    let h = Harness::new(Duration::from_secs(10));

    let resp = app(&h)
        .oneshot(post_json(
            "/api/builds/trigger",
            serde_json::json!({"course": "cs999", "user": "alice", "lab": "lab1"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app(&h)
        .oneshot(post_json(
            "/api/builds/trigger",
            serde_json::json!({"course": "cs101", "user": "mallory", "lab": "lab1"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app(&h)
        .oneshot(post_json(
            "/api/builds/trigger",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": "lab9"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trigger_runs_build_in_background() {
    let h = Harness::new(Duration::from_secs(20));
    let resp = app(&h)
        .oneshot(post_json(
            "/api/builds/trigger",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": "lab2"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    // The clone step cannot reach the git host, so the run stops early.
    let result = wait_for_build(&h, 1).await;
    assert_eq!(result.labnum, 2);
    assert_eq!(result.total_score, 0);
    assert!(result.log.iter().any(|l| l == UNEXPECTED_END));
    assert!(result.log.iter().all(|l| !l.contains("tok@")));
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let h = Harness::new(Duration::from_secs(10));
    let resp = app(&h)
        .oneshot(webhook("push", "{}", "sha256=00"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_ignores_ping_and_unknown_repos() {
    let h = Harness::new(Duration::from_secs(10));

    let body = r#"{"zen":"Design for failure."}"#;
    let resp = app(&h)
        .oneshot(webhook("ping", body, &sign(body.as_bytes())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = r#"{"ref":"refs/heads/main","repository":{"name":"mallory-labs","owner":{"login":"cs101"}}}"#;
    let resp = app(&h)
        .oneshot(webhook("push", body, &sign(body.as_bytes())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(h.storage.build_count(), 0);
}

#[tokio::test]
async fn test_webhook_push_builds_current_lab() {
    let h = Harness::new(Duration::from_secs(20));
    let body = r#"{"ref":"refs/heads/main","repository":{"name":"group3","owner":{"login":"cs101"}}}"#;
    let resp = app(&h)
        .oneshot(webhook("push", body, &sign(body.as_bytes())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let result = wait_for_build(&h, 1).await;
    assert_eq!(result.user, "group3");
    assert_eq!(result.labnum, 1);
}

#[tokio::test]
async fn test_approve_and_summary() {
    let h = Harness::new(Duration::from_secs(10));
    let mut result = BuildResult::new(1, "cs101", "alice", 1);
    result.total_score = 80;
    result.log.push("PASS: 1".to_string());
    h.storage.put_build(&result).await.unwrap();
    h.daemon
        .store()
        .with_owner(&OwnerKey::user("alice"), |o| o.add_build_result("cs101", 1, 1))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(post_json(
            "/api/approve",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": 2, "build_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app(&h)
        .oneshot(post_json(
            "/api/approve",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": 1, "build_id": 1}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let approved: ApproveResponse = body_json(resp).await;
    assert_eq!(approved.current_lab_num, 2);

    let resp = app(&h)
        .oneshot(post_json(
            "/api/notes",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": 1, "notes": "well done"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = app(&h)
        .oneshot(get("/api/summary?course=cs101&user=alice"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let summary: Vec<LabSummary> = body_json(resp).await;
    assert_eq!(summary.len(), 1);
    assert_eq!(summary[0].lab.as_deref(), Some("lab1"));
    assert_eq!(summary[0].approved_build, Some(1));
    assert_eq!(summary[0].notes, "well done");
    assert_eq!(summary[0].latest.as_ref().map(|s| s.total_score), Some(80));

    let resp = app(&h).oneshot(get("/api/results/1")).await.unwrap();
    let full: BuildResult = body_json(resp).await;
    assert_eq!(full.log, vec!["PASS: 1".to_string()]);
}

#[tokio::test]
async fn test_approve_rejects_someone_elses_build() {
    let h = Harness::new(Duration::from_secs(10));
    h.storage
        .put_build(&BuildResult::new(2, "cs101", "mallory", 1))
        .await
        .unwrap();

    let resp = app(&h)
        .oneshot(post_json(
            "/api/approve",
            serde_json::json!({"course": "cs101", "user": "alice", "lab": 1, "build_id": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(h.daemon.store().owner(&OwnerKey::user("alice")).await.unwrap().is_none());
}
