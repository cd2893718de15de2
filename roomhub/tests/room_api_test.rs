//! Room HTTP API Integration Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`: the topic
//! directory, room info with placeholder and indexed context, and the
//! single-shot `POST /room` assistant with its auth, validation, direct
//! message and paywall branches.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use roomhub::api;
use roomhub::app_state::{AppState, Collaborators};
use roomhub::collaborators::{
    FetchError, GenerationRequest, IndexEntry, IndexError, InMemoryIndex, LanguageModel,
    ModelError, PageFetcher, Paywall, QuotaGate, SearchIndex, USER_ID_HEADER,
};
use roomhub::config::{RoomTimings, ServerConfig};
use shared_types::PriceQuote;

struct ScriptedModel {
    reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.reply.clone())
    }
}

struct NoFetch;

#[async_trait]
impl PageFetcher for NoFetch {
    async fn fetch_text(&self, url: &str, _max_chars: usize) -> Result<String, FetchError> {
        Err(FetchError::Request(format!("offline: {url}")))
    }
}

/// Index whose lookups never finish in time.
struct StallingIndex;

#[async_trait]
impl SearchIndex for StallingIndex {
    async fn get_entry(&self, _id: &str) -> Result<Option<IndexEntry>, IndexError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<IndexEntry>, IndexError> {
        Ok(Vec::new())
    }

    async fn price(&self, _symbol: &str) -> Result<Option<PriceQuote>, IndexError> {
        Ok(None)
    }

    async fn latest_prices(&self) -> Result<Vec<PriceQuote>, IndexError> {
        Ok(Vec::new())
    }
}

struct DenyAll {
    checks: AtomicUsize,
}

#[async_trait]
impl QuotaGate for DenyAll {
    async fn check(&self, _user_id: &str) -> Result<(), Paywall> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Err(Paywall {
            message: "You are out of credits".to_string(),
            upgrade_url: Some("https://example.com/upgrade".to_string()),
        })
    }
}

struct TestApp {
    router: axum::Router,
    app_state: Arc<AppState>,
    model: Arc<ScriptedModel>,
    _temp_dir: tempfile::TempDir,
}

fn setup_test_app_with(
    index: InMemoryIndex,
    quota: Option<Arc<dyn QuotaGate>>,
) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = ServerConfig {
        data_dir: temp_dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let model = ScriptedModel::new("Here is what I found.");
    let mut collaborators =
        Collaborators::new(Arc::new(index), model.clone(), Arc::new(NoFetch));
    if let Some(quota) = quota {
        collaborators.quota = quota;
    }

    let app_state = Arc::new(AppState::new(config, collaborators));
    let router = api::router().with_state(api::ApiState {
        app_state: app_state.clone(),
    });
    TestApp {
        router,
        app_state,
        model,
        _temp_dir: temp_dir,
    }
}

fn setup_test_app() -> TestApp {
    setup_test_app_with(InMemoryIndex::new(), None)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).expect("Invalid JSON response");
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/room")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ============================================================================
// GET
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = setup_test_app();

    let (status, body) = json_response(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "roomhub");
    assert_eq!(body["rooms"], 0);
}

#[tokio::test]
async fn test_get_room_without_id_lists_topics() {
    let app = setup_test_app();

    let (status, body) = json_response(&app.router, get("/room")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topics"], json!(["General", "Dev", "Markets"]));
    assert!(body["summaries"].is_object());
}

#[tokio::test]
async fn test_get_room_uses_placeholder_for_unindexed_item() {
    let app = setup_test_app();

    let (status, body) = json_response(&app.router, get("/room?id=news_42")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "news_42");
    assert_eq!(body["title"], "News Discussion");
    assert_eq!(body["isRoom"], true);
    assert_eq!(app.app_state.registry().room_count().await, 1);
}

#[tokio::test]
async fn test_get_room_times_out_when_context_stalls() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let config = ServerConfig {
        data_dir: temp_dir.path().to_path_buf(),
        timings: RoomTimings {
            info_timeout: Duration::from_millis(100),
            lookup_timeout: Duration::from_secs(10),
            ..RoomTimings::default()
        },
        ..ServerConfig::default()
    };
    let app_state = Arc::new(AppState::new(
        config,
        Collaborators::new(
            Arc::new(StallingIndex),
            ScriptedModel::new("unused"),
            Arc::new(NoFetch),
        ),
    ));
    let router = api::router().with_state(api::ApiState { app_state });

    let started = std::time::Instant::now();
    let (status, body) = json_response(&router, get("/room?id=news_1")).await;

    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert!(body["error"].as_str().unwrap().contains("news_1"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_get_room_seeds_context_from_index() {
    let index = InMemoryIndex::new();
    index.insert(IndexEntry {
        id: "7".to_string(),
        title: "Rust 2024 edition ships".to_string(),
        summary: "The new edition is stable.".to_string(),
        content: "Long article body".to_string(),
        url: "https://example.com/rust-2024".to_string(),
        topic: Some("Dev".to_string()),
    });
    let app = setup_test_app_with(index, None);

    let (status, body) = json_response(&app.router, get("/room?id=post_7")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Rust 2024 edition ships");
    assert_eq!(body["summary"], "The new edition is stable.");
    assert_eq!(body["url"], "https://example.com/rust-2024");
}

#[tokio::test]
async fn test_get_room_rejects_malformed_id() {
    let app = setup_test_app();

    let (status, body) = json_response(&app.router, get("/room?id=podcast_1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("podcast"));

    let (status, _) = json_response(&app.router, get("/room?id=nounderscore")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.app_state.registry().room_count().await, 0);
}

// ============================================================================
// POST
// ============================================================================

#[tokio::test]
async fn test_post_room_requires_identity() {
    let app = setup_test_app();

    let (status, _) = json_response(&app.router, post_json(None, json!({"prompt": "hi"}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.model.requests().is_empty());
}

#[tokio::test]
async fn test_post_room_rejects_empty_and_oversize_prompts() {
    let app = setup_test_app();

    let (status, _) =
        json_response(&app.router, post_json(Some("ada"), json!({"prompt": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long = "x".repeat(api::MAX_MESSAGE_CHARS + 1);
    let (status, _) =
        json_response(&app.router, post_json(Some("ada"), json!({"prompt": long}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.model.requests().is_empty());
}

#[tokio::test]
async fn test_post_room_answers_single_shot() {
    let app = setup_test_app();

    let (status, body) = json_response(
        &app.router,
        post_json(
            Some("ada"),
            json!({"prompt": "What changed this week?", "context": "Release notes: v2 shipped", "topic": "Dev"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Here is what I found.");
    assert_eq!(body["topic"], "Dev");

    let requests = app.model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].question, "What changed this week?");
    assert!(requests[0]
        .context
        .iter()
        .any(|line| line.contains("Release notes: v2 shipped")));
}

#[tokio::test]
async fn test_post_room_accepts_form_body_and_defaults_topic() {
    let app = setup_test_app();

    let req = Request::builder()
        .method("POST")
        .uri("/room")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(USER_ID_HEADER, "ada")
        .body(Body::from("prompt=hello+there"))
        .unwrap();
    let (status, body) = json_response(&app.router, req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["topic"], "General");
    assert_eq!(app.model.requests()[0].question, "hello there");
}

#[tokio::test]
async fn test_post_room_direct_message_goes_to_topic_room() {
    let app = setup_test_app();

    let (status, body) = json_response(
        &app.router,
        post_json(Some("ada"), json!({"prompt": "@bob are you around?", "topic": "Dev"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "sent");
    assert_eq!(body["room"], "topic_Dev");
    assert!(app.model.requests().is_empty());

    let room = app
        .app_state
        .registry()
        .get_or_create("topic_Dev")
        .await
        .unwrap();
    let history = room.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].author, "ada");
    assert_eq!(history[0].content, "@bob are you around?");
}

#[tokio::test]
async fn test_post_room_assistant_mention_is_not_a_direct_message() {
    let app = setup_test_app();

    let (status, body) = json_response(
        &app.router,
        post_json(Some("ada"), json!({"prompt": "@micro summarize the day"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "Here is what I found.");
    assert_eq!(app.model.requests()[0].question, "summarize the day");
}

#[tokio::test]
async fn test_post_room_paywall() {
    let quota = Arc::new(DenyAll {
        checks: AtomicUsize::new(0),
    });
    let app = setup_test_app_with(InMemoryIndex::new(), Some(quota.clone()));

    let (status, body) =
        json_response(&app.router, post_json(Some("ada"), json!({"prompt": "hello"}))).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "paywall");
    assert_eq!(body["message"], "You are out of credits");
    assert_eq!(body["upgrade_url"], "https://example.com/upgrade");
    assert_eq!(quota.checks.load(Ordering::SeqCst), 1);
    assert!(app.model.requests().is_empty());
}
