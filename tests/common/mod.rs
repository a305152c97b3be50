#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use foundation_sdk::{ApiClient, Credentials};
use secrecy::SecretString;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const TEST_USERNAME: &str = "bot";
pub const TEST_PASSWORD: &str = "secret";
pub const TEST_AGENT: &str = "agent-1";
pub const EMPTY_POLL_DELAY: Duration = Duration::from_millis(20);

/// Scripted reply for the next events poll.
#[derive(Debug)]
pub enum Scripted {
    Batch(Value),
    Status(StatusCode),
}

/// In-memory stand-in for the collaboration service.
#[derive(Default)]
pub struct MockService {
    pub auth_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    pub reject_credentials: AtomicBool,
    pub reject_all_tokens: AtomicBool,
    pub accepted_tokens: Mutex<HashSet<String>>,
    pub resource_authorization: Mutex<Vec<Option<String>>>,
    pub scripted_events: Mutex<VecDeque<Scripted>>,
    pub event_queries: Mutex<Vec<HashMap<String, String>>>,
    pub posted_messages: Mutex<Vec<(String, Value)>>,
    pub history_queries: Mutex<Vec<HashMap<String, String>>>,
    pub composing_updates: Mutex<Vec<(String, Value)>>,
    pub search_requests: Mutex<Vec<Value>>,
}

impl MockService {
    pub fn revoke_tokens(&self) {
        self.accepted_tokens.lock().expect("tokens lock").clear();
    }

    pub fn push_batch(&self, batch: Value) {
        self.scripted_events
            .lock()
            .expect("script lock")
            .push_back(Scripted::Batch(batch));
    }

    pub fn push_status(&self, status: StatusCode) {
        self.scripted_events
            .lock()
            .expect("script lock")
            .push_back(Scripted::Status(status));
    }

    pub fn event_queries(&self) -> Vec<HashMap<String, String>> {
        self.event_queries.lock().expect("queries lock").clone()
    }

    pub fn poll_count(&self) -> usize {
        self.event_queries.lock().expect("queries lock").len()
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        if self.reject_all_tokens.load(Ordering::SeqCst) {
            return false;
        }
        authorization(headers)
            .as_deref()
            .and_then(|value| value.strip_prefix("FCF "))
            .is_some_and(|token| {
                self.accepted_tokens
                    .lock()
                    .expect("tokens lock")
                    .contains(token)
            })
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub service: Arc<MockService>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl MockServer {
    pub async fn start() -> Self {
        let service = Arc::new(MockService::default());
        let app = Router::new()
            .route("/Authentication/v1/Tokens", post(issue_token))
            .route("/X", get(resource))
            .route("/Collaboration/v1/Events", get(events))
            .route("/Collaboration/v1/Channels", get(list_channels))
            .route("/Collaboration/v1/Channels/Search", post(search_channels))
            .route("/Collaboration/v1/Channels/:id", get(channel_info))
            .route("/Collaboration/v1/Channels/:id/State", get(channel_state))
            .route("/Collaboration/v1/Channels/:id/Me", post(update_composing))
            .route(
                "/Collaboration/v1/Channels/:id/Messages",
                get(channel_history).post(post_message),
            )
            .route("/Collaboration/v1/MetaData", get(metadata))
            .with_state(Arc::clone(&service));
        let (addr, shutdown_tx, task) = spawn_server(app).await;

        Self {
            addr,
            service,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(self.base_url(), credentials()).expect("build api client")
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.expect("mock server task should join");
        }
    }
}

pub fn credentials() -> Credentials {
    Credentials::new(
        TEST_USERNAME,
        SecretString::new(TEST_PASSWORD.to_string()),
        TEST_AGENT,
    )
}

/// Polls `condition` until it holds, panicking after two seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn authorization(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn issue_token(State(mock): State<Arc<MockService>>, Json(payload): Json<Value>) -> Response {
    let call = mock.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let credentials_match = payload.get("Username").and_then(Value::as_str) == Some(TEST_USERNAME)
        && payload.get("Password").and_then(Value::as_str) == Some(TEST_PASSWORD)
        && payload.get("AgentId").and_then(Value::as_str) == Some(TEST_AGENT);

    if !credentials_match || mock.reject_credentials.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"Message": "invalid credentials"})),
        )
            .into_response();
    }

    let token = format!("tok{call}");
    mock.accepted_tokens
        .lock()
        .expect("tokens lock")
        .insert(token.clone());
    Json(token).into_response()
}

async fn resource(State(mock): State<Arc<MockService>>, headers: HeaderMap) -> Response {
    mock.resource_calls.fetch_add(1, Ordering::SeqCst);
    mock.resource_authorization
        .lock()
        .expect("authorization lock")
        .push(authorization(&headers));

    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"ok": true})).into_response()
}

async fn events(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.event_queries
        .lock()
        .expect("queries lock")
        .push(query);

    let next = mock
        .scripted_events
        .lock()
        .expect("script lock")
        .pop_front();
    match next {
        Some(Scripted::Batch(batch)) => Json(batch).into_response(),
        Some(Scripted::Status(status)) => status.into_response(),
        None => {
            tokio::time::sleep(EMPTY_POLL_DELAY).await;
            Json(json!([])).into_response()
        }
    }
}

async fn post_message(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.posted_messages
        .lock()
        .expect("posted lock")
        .push((channel_id, payload));
    StatusCode::OK.into_response()
}

async fn channel_history(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.history_queries
        .lock()
        .expect("history lock")
        .push(query);
    Json(json!([{
        "Id": "m1",
        "IsAlert": false,
        "SenderId": "contact:bob",
        "SenderAlias": "Bob",
        "ChannelId": channel_id,
        "Text": "hello",
        "Timestamp": 1_700_000_000_000i64,
    }]))
    .into_response()
}

fn channel_json(channel_id: &str) -> Value {
    json!({
        "Id": channel_id,
        "DisplayName": "Ops",
        "CanAcceptFiles": true,
        "MetaData": [{"Key": "team", "Value": "sre"}],
    })
}

async fn list_channels(State(mock): State<Arc<MockService>>, headers: HeaderMap) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([channel_json("chat-room:ops"), channel_json("chat-room:dev")])).into_response()
}

async fn channel_info(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(channel_json(&channel_id)).into_response()
}

async fn channel_state(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({
        "Subject": format!("{channel_id} subject"),
        "PresenceState": 500,
        "PresenceText": "lunch",
    }))
    .into_response()
}

async fn update_composing(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Path(channel_id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.composing_updates
        .lock()
        .expect("composing lock")
        .push((channel_id, payload));
    StatusCode::OK.into_response()
}

async fn search_channels(
    State(mock): State<Arc<MockService>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let channel_ids = payload
        .get("ChannelIds")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    mock.search_requests
        .lock()
        .expect("search lock")
        .push(payload);

    let results: Vec<Value> = channel_ids
        .into_iter()
        .map(|channel_id| {
            json!({
                "ChannelId": channel_id,
                "Count": 1,
                "MaxMessageId": "m2",
                "MinMessageId": "m2",
                "Messages": [{
                    "Id": "m2",
                    "SenderId": "contact:bob",
                    "ChannelId": channel_id,
                    "Text": "outage report",
                    "Timestamp": 1_700_000_000_000i64,
                }],
            })
        })
        .collect();
    Json(results).into_response()
}

async fn metadata(State(mock): State<Arc<MockService>>, headers: HeaderMap) -> Response {
    if !mock.is_authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!([
        {"Key": "team", "Value": "sre"},
        {"Key": "region", "Value": "eu"},
    ]))
    .into_response()
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
