// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health and GET /status
// - POST /triggers/cycle phase reporting
// - draft list filters and detail lookup errors
// - editorial approve / reject / cancel, including the wire shape of
//   draft statuses (SCREAMING_SNAKE_CASE)

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`
use uuid::Uuid;

use newsdesk_autopilot::draft::{Draft, DraftStatus};
use newsdesk_autopilot::fetch::rss::RssFeed;
use newsdesk_autopilot::publish::{PublishError, Publisher};
use newsdesk_autopilot::repo::{DraftRepository, DynRepo, MemoryRepository};
use newsdesk_autopilot::sources::{Source, SourceCategory, SourceRegistry};
use newsdesk_autopilot::{create_router, Orchestrator, Settings};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

struct StubCms;

#[async_trait]
impl Publisher for StubCms {
    async fn publish(&self, draft: &Draft) -> Result<String, PublishError> {
        Ok(format!("cms-{}", draft.event_key))
    }
    fn channel(&self) -> &'static str {
        "cms"
    }
}

/// Build the same Router the binary serves, over an empty in-memory store
/// and no AI provider. The repo handle comes back so tests can seed drafts.
fn test_app() -> (Router, DynRepo) {
    let repo: DynRepo = Arc::new(MemoryRepository::new());
    let registry = Arc::new(SourceRegistry::new(vec![Source {
        id: "wire".into(),
        name: "Regional Wire".into(),
        trust: 0.85,
        category: SourceCategory::Media,
        active: true,
        feed_url: String::new(),
        last_fetched: None,
    }]));
    let feed = Arc::new(RssFeed::from_fixture("<rss><channel></channel></rss>"));
    let orchestrator = Arc::new(Orchestrator::with_channels(
        Settings::default(),
        registry,
        repo.clone(),
        feed,
        None,
        Arc::new(StubCms),
        None,
        None,
    ));
    (create_router(orchestrator), repo)
}

fn pending_draft() -> Draft {
    let mut d = Draft::new(
        "evt-review",
        "Council story awaiting review",
        "Excerpt.",
        "wire",
        "Regional Wire",
        SourceCategory::Official,
        0.95,
    );
    d.status = DraftStatus::PendingOk;
    d
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET request")
}

fn post_json(uri: &str, payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST request")
}

async fn json_body(resp: Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json body")
}

#[tokio::test]
async fn health_returns_200_and_ok_body() {
    let (app, _repo) = test_app();

    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let text = String::from_utf8(bytes).expect("utf8");
    assert_eq!(text.trim(), "ok");
}

#[tokio::test]
async fn status_reports_store_counts_and_wiring() {
    let (app, repo) = test_app();
    repo.insert(pending_draft()).expect("seed draft");

    let resp = app.oneshot(get("/status")).await.expect("oneshot /status");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["sources"], 1);
    assert_eq!(v["ai_provider"], "disabled");
    assert_eq!(v["auto_publish"], true);
    assert_eq!(v["cadence_secs"], 300);
    assert_eq!(v["drafts"]["PENDING_OK"], 1);
    assert!(v.get("last_cycle").is_none(), "no cycle has run yet");
}

#[tokio::test]
async fn cycle_trigger_reports_all_four_phases_in_order() {
    let (app, _repo) = test_app();

    let req = Request::builder()
        .method("POST")
        .uri("/triggers/cycle")
        .body(Body::empty())
        .expect("build POST /triggers/cycle");
    let resp = app.clone().oneshot(req).await.expect("oneshot cycle");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    let phases: Vec<&str> = v
        .as_array()
        .expect("array of phase summaries")
        .iter()
        .map(|s| s["phase"].as_str().expect("phase name"))
        .collect();
    assert_eq!(
        phases,
        vec!["fetch-sources", "process-queue", "auto-publish", "cleanup"]
    );
    // No AI provider wired in the test app.
    assert_eq!(v[1]["skipped"], true);
    assert_eq!(v[1]["note"], "ai provider disabled");

    // The cycle is now visible on the status endpoint.
    let resp = app.oneshot(get("/status")).await.expect("oneshot /status");
    let v = json_body(resp).await;
    assert_eq!(v["last_cycle"].as_array().expect("last cycle").len(), 4);
}

#[tokio::test]
async fn drafts_can_be_filtered_by_status() {
    let (app, repo) = test_app();
    repo.insert(pending_draft()).expect("seed draft");

    // Filter values are case-insensitive.
    let resp = app
        .clone()
        .oneshot(get("/drafts?status=pending_ok"))
        .await
        .expect("oneshot filtered list");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    let rows = v.as_array().expect("array of rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "PENDING_OK");
    assert_eq!(rows[0]["title"], "Council story awaiting review");
    assert_eq!(rows[0]["category"], "official");

    let resp = app
        .oneshot(get("/drafts?status=published"))
        .await
        .expect("oneshot empty list");
    let v = json_body(resp).await;
    assert_eq!(v.as_array().expect("array").len(), 0);
}

#[tokio::test]
async fn unknown_status_filter_is_rejected_with_400() {
    let (app, _repo) = test_app();

    let resp = app
        .oneshot(get("/drafts?status=bogus"))
        .await
        .expect("oneshot bad filter");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let v = json_body(resp).await;
    let msg = v["error"].as_str().expect("error message");
    assert!(msg.contains("bogus"), "error should echo the value: {msg}");
}

#[tokio::test]
async fn missing_draft_detail_is_a_404() {
    let (app, _repo) = test_app();

    let resp = app
        .oneshot(get(&format!("/drafts/{}", Uuid::new_v4())))
        .await
        .expect("oneshot missing draft");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let v = json_body(resp).await;
    let msg = v["error"].as_str().expect("error message");
    assert!(msg.contains("not found"), "got: {msg}");
}

#[tokio::test]
async fn approve_without_body_parks_the_draft_auto_ready() {
    let (app, repo) = test_app();
    let d = pending_draft();
    let id = d.id;
    repo.insert(d).expect("seed draft");

    // No JSON body at all; `schedule` defaults to false.
    let req = Request::builder()
        .method("POST")
        .uri(format!("/drafts/{id}/approve"))
        .body(Body::empty())
        .expect("build POST approve");
    let resp = app.oneshot(req).await.expect("oneshot approve");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["status"], "AUTO_READY");
    assert!(v["publish_at"].is_null(), "no window armed yet");
}

#[tokio::test]
async fn approve_with_schedule_arms_the_publish_window() {
    let (app, repo) = test_app();
    let d = pending_draft();
    let id = d.id;
    repo.insert(d).expect("seed draft");

    let resp = app
        .oneshot(post_json(
            &format!("/drafts/{id}/approve"),
            &json!({ "schedule": true }),
        ))
        .await
        .expect("oneshot approve+schedule");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["status"], "SCHEDULED");
    assert!(v["publish_at"].is_string(), "window must carry a timestamp");
}

#[tokio::test]
async fn reject_records_the_editorial_reason() {
    let (app, repo) = test_app();
    let d = pending_draft();
    let id = d.id;
    repo.insert(d).expect("seed draft");

    let resp = app
        .clone()
        .oneshot(post_json(
            &format!("/drafts/{id}/reject"),
            &json!({ "reason": "duplicate coverage" }),
        ))
        .await
        .expect("oneshot reject");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = json_body(resp).await;
    assert_eq!(v["status"], "REJECTED");
    assert_eq!(v["reject_reason"], "duplicate coverage");

    // Rejecting a terminal draft is a conflict.
    let resp = app
        .oneshot(post_json(&format!("/drafts/{id}/reject"), &json!({})))
        .await
        .expect("oneshot second reject");
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_outside_a_window_is_a_409() {
    let (app, repo) = test_app();
    let d = pending_draft();
    let id = d.id;
    repo.insert(d).expect("seed draft");

    let req = Request::builder()
        .method("POST")
        .uri(format!("/drafts/{id}/cancel"))
        .body(Body::empty())
        .expect("build POST cancel");
    let resp = app.oneshot(req).await.expect("oneshot cancel");
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let v = json_body(resp).await;
    assert_eq!(v["outcome"], "not-scheduled");
}
