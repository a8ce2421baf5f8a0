use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use nudge_core::config::{Config, RepoConfig};
use nudge_core::lock::ExclusionLock;
use nudge_core::store::MemoryStore;
use nudge_server::collaborators::{Card, Collaborators, LogWorker, Notifier, StaticRepoSource};
use nudge_server::signature::sign;
use nudge_server::{build_router, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
    cards: Mutex<Vec<(String, Card)>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    fn card_count(&self) -> usize {
        self.cards.lock().unwrap().len()
    }

    fn last_card(&self) -> Card {
        self.cards.lock().unwrap().last().unwrap().1.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, owner: &str, text: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((owner.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_card(&self, owner: &str, card: &Card) -> anyhow::Result<()> {
        self.cards
            .lock()
            .unwrap()
            .push((owner.to_string(), card.clone()));
        Ok(())
    }
}

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
}

fn harness() -> Harness {
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut repos = BTreeMap::new();
    repos.insert(
        "alice".to_string(),
        ["web", "api", "cli"]
            .into_iter()
            .map(|name| RepoConfig {
                name: name.to_string(),
                last_modified: t,
            })
            .collect(),
    );
    let config = Config {
        repos: repos.clone(),
        ..Config::default()
    };
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let collaborators = Collaborators {
        repos: Arc::new(StaticRepoSource::new(repos)),
        worker: Arc::new(LogWorker),
        notifier: notifier.clone(),
    };
    Harness {
        state: AppState::new(config, store.clone(), collaborators),
        store,
        notifier,
    }
}

async fn send(
    state: &AppState,
    req: axum::http::Request<axum::body::Body>,
) -> (StatusCode, Value) {
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn get(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    send(state, req).await
}

async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = axum::http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(state, req).await
}

async fn post_event(state: &AppState, event_id: Value, payload: Value) -> (StatusCode, Value) {
    post_json(
        state,
        "/api/events",
        json!({ "event_id": event_id, "payload": payload }),
    )
    .await
}

async fn callback(state: &AppState, body: Value) -> (StatusCode, Value) {
    post_json(state, "/api/callbacks", body).await
}

fn assert_expired(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(
        body,
        &json!({ "status": "expired", "message": "This card has expired. Start over." })
    );
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_store_reachability() {
    let h = harness();
    let (status, body) = get(&h.state, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    h.store.set_offline(true);
    let (status, body) = get(&h.state, "/api/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"], "unreachable");
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn redelivered_event_is_dispatched_once() {
    let h = harness();
    let payload = json!({ "type": "cancel", "user": "alice" });

    let (status, body) = post_event(&h.state, json!(1001), payload.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["action"], "nothing_running");

    let (status, body) = post_event(&h.state, json!(1001), payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(h.notifier.messages().len(), 1);
}

#[tokio::test]
async fn store_outage_still_processes_events() {
    let h = harness();
    h.store.set_offline(true);
    let (status, body) =
        post_event(&h.state, json!("d-1"), json!({ "type": "cards", "user": "bob" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "no_repos");
}

#[tokio::test]
async fn malformed_event_is_bad_request() {
    let h = harness();
    let (status, body) = post_json(&h.state, "/api/events", json!({ "payload": {} })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid event"));
}

#[tokio::test]
async fn signed_events_require_valid_signature() {
    let h = harness();
    let state = h.state.with_webhook_secret(Some("s3cret".into()));
    let body = serde_json::to_vec(&json!({
        "event_id": 7,
        "payload": { "type": "cancel", "user": "alice" }
    }))
    .unwrap();

    let unsigned = axum::http::Request::builder()
        .method("POST")
        .uri("/api/events")
        .body(axum::body::Body::from(body.clone()))
        .unwrap();
    assert_eq!(send(&state, unsigned).await.0, StatusCode::UNAUTHORIZED);

    let forged = axum::http::Request::builder()
        .method("POST")
        .uri("/api/events")
        .header("x-nudge-signature", sign(&body, b"wrong"))
        .body(axum::body::Body::from(body.clone()))
        .unwrap();
    assert_eq!(send(&state, forged).await.0, StatusCode::UNAUTHORIZED);

    let signed = axum::http::Request::builder()
        .method("POST")
        .uri("/api/events")
        .header("x-nudge-signature", sign(&body, b"s3cret"))
        .body(axum::body::Body::from(body))
        .unwrap();
    let (status, json) = send(&state, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");
}

#[tokio::test]
async fn push_analyzes_then_hits_cache() {
    let h = harness();
    let payload = json!({
        "type": "push",
        "owner": "alice",
        "repo": "web",
        "last_modified": "2026-01-01T00:00:00Z"
    });
    let (_, body) = post_event(&h.state, json!("push-1"), payload.clone()).await;
    assert_eq!(body["outcome"], "analyzed");
    let (_, body) = post_event(&h.state, json!("push-2"), payload).await;
    assert_eq!(body["outcome"], "cached");
}

#[tokio::test]
async fn push_for_locked_repo_is_busy() {
    let h = harness();
    let other = ExclusionLock::new(h.store.clone());
    assert!(
        other
            .acquire("analyze:alice/web", Duration::from_secs(300))
            .await
    );
    let payload = json!({
        "type": "push",
        "owner": "alice",
        "repo": "web",
        "last_modified": "2026-01-01T00:00:00Z"
    });
    let (status, body) = post_event(&h.state, json!("push-3"), payload.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("alice/web"));

    // The failed delivery gave up its claim, so the redelivery is analyzed.
    other.release("analyze:alice/web").await;
    let (status, body) = post_event(&h.state, json!("push-3"), payload).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
    assert_eq!(body["outcome"], "analyzed");
}

#[tokio::test]
async fn event_names_are_validated_before_claiming() {
    let h = harness();
    let (status, _) =
        post_event(&h.state, json!(70), json!({ "type": "scan", "user": "alice:x" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) =
        post_event(&h.state, json!(71), json!({ "type": "cards", "user": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_event(
        &h.state,
        json!(72),
        json!({
            "type": "push",
            "owner": "alice",
            "repo": "b/c",
            "last_modified": "2026-01-01T00:00:00Z"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("b/c"));
    let locks = ExclusionLock::new(h.store.clone());
    assert!(locks.holder("analyze:alice/b/c").await.unwrap().is_none());

    // A rejected event does not consume its id.
    let (status, body) =
        post_event(&h.state, json!(70), json!({ "type": "cancel", "user": "alice" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processed");
}

#[tokio::test]
async fn scan_event_runs_sweep_in_background() {
    let h = harness();
    let (status, body) =
        post_event(&h.state, json!(55), json!({ "type": "scan", "user": "alice" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "scan_started");
    assert_eq!(body["total"], 3);

    let mut report = Value::Null;
    for _ in 0..100 {
        let (_, status) = get(&h.state, "/api/jobs/scan/alice").await;
        if !status["last_report"].is_null() {
            report = status["last_report"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(report["status"], "completed");
    assert_eq!(report["analyzed"], 3);
}

// ---------------------------------------------------------------------------
// Callbacks: carousel
// ---------------------------------------------------------------------------

async fn open_carousel(h: &Harness) -> String {
    let (status, body) =
        post_event(&h.state, json!("cards-1"), json!({ "type": "cards", "user": "alice" })).await;
    assert_eq!(status, StatusCode::OK);
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn carousel_pages_and_rejects_stale_presses() {
    let h = harness();
    let id = open_carousel(&h).await;
    assert_eq!(h.notifier.card_count(), 1);

    let first = h.notifier.last_card();
    assert_eq!(first.version, 1);

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": first.session_id, "action": "next", "version": first.version }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);
    assert!(body["card"]["text"].as_str().unwrap().starts_with("api"));
    assert_eq!(h.notifier.last_card().version, 2);

    // Pressing the first card again is stale.
    let (status, body) = callback(
        &h.state,
        json!({ "session_id": first.session_id, "action": "next", "version": first.version }),
    )
    .await;
    assert_expired(status, &body);

    let (_, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "prev", "version": 2 }),
    )
    .await;
    assert_eq!(body["version"], 3);
    assert!(body["card"]["text"].as_str().unwrap().starts_with("web"));
}

#[tokio::test]
async fn press_without_version_is_rejected() {
    let h = harness();
    let id = open_carousel(&h).await;
    let (status, _) = callback(&h.state, json!({ "session_id": id, "action": "next" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(h.notifier.card_count(), 1);
}

#[tokio::test]
async fn skip_replaces_session_and_retires_old_id() {
    let h = harness();
    let id = open_carousel(&h).await;

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "skip", "version": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let new_id = body["session_id"].as_str().unwrap().to_string();
    assert_ne!(new_id, id);
    assert_eq!(body["version"], 1);
    assert!(body["card"]["text"].as_str().unwrap().contains("(1 of 2)"));

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "next", "version": 1 }),
    )
    .await;
    assert_expired(status, &body);

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": new_id, "action": "done", "version": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "done");

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": new_id, "action": "next", "version": 1 }),
    )
    .await;
    assert_expired(status, &body);
}

#[tokio::test]
async fn unknown_session_is_expired() {
    let h = harness();
    let (status, body) = callback(
        &h.state,
        json!({ "session_id": "nope123456", "action": "next", "version": 1 }),
    )
    .await;
    assert_expired(status, &body);
}

#[tokio::test]
async fn concurrent_press_on_same_card_conflicts() {
    let h = harness();
    let id = open_carousel(&h).await;
    let other = ExclusionLock::new(h.store.clone());
    assert!(
        other
            .acquire(&format!("session:{id}"), Duration::from_secs(30))
            .await
    );
    let (status, _) = callback(
        &h.state,
        json!({ "session_id": id, "action": "next", "version": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

// ---------------------------------------------------------------------------
// Callbacks: image approval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_approval_posts_once() {
    let h = harness();
    let (_, body) = post_event(
        &h.state,
        json!("img-1"),
        json!({
            "type": "announce",
            "user": "alice",
            "image_url": "https://img.example/launch.png",
            "caption": "web is live"
        }),
    )
    .await;
    assert_eq!(body["action"], "approval_requested");
    let id = body["session_id"].as_str().unwrap().to_string();

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "approve", "version": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");
    assert!(h
        .notifier
        .messages()
        .iter()
        .any(|(owner, text)| owner == "alice" && text == "Posted: web is live"));

    let (status, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "approve", "version": 1 }),
    )
    .await;
    assert_expired(status, &body);
}

#[tokio::test]
async fn approval_action_on_carousel_is_expired() {
    let h = harness();
    let id = open_carousel(&h).await;
    let (status, body) = callback(
        &h.state,
        json!({ "session_id": id, "action": "approve", "version": 1 }),
    )
    .await;
    assert_expired(status, &body);
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_job_returns_report_and_status_shows_it() {
    let h = harness();
    let (status, report) = post_json(&h.state, "/api/jobs/scan/alice", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["total"], 3);
    assert_eq!(report["analyzed"], 3);

    let (_, again) = post_json(&h.state, "/api/jobs/scan/alice", json!({})).await;
    assert_eq!(again["cached"], 3);

    let (status, body) = get(&h.state, "/api/jobs/scan/alice").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["active"].is_null());
    assert_eq!(body["last_report"]["job_id"], again["job_id"]);
}

#[tokio::test]
async fn start_job_while_running_conflicts() {
    let h = harness();
    let other = ExclusionLock::new(h.store.clone());
    assert!(other.acquire("scan:alice", Duration::from_secs(900)).await);
    let (status, body) = post_json(&h.state, "/api/jobs/scan/alice", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already running"));
}

#[tokio::test]
async fn cancel_without_running_job() {
    let h = harness();
    let (status, body) = post_json(&h.state, "/api/jobs/scan/alice/cancel", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
}

#[tokio::test]
async fn unknown_class_and_bad_owner() {
    let h = harness();
    let (status, _) = post_json(&h.state, "/api/jobs/deploy/alice", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&h.state, "/api/jobs/scan/bad!owner").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn store_outage_on_status_is_503() {
    let h = harness();
    h.store.set_offline(true);
    let (status, body) = get(&h.state, "/api/jobs/scan/alice").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("store"));
}
