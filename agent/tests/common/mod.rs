//! Shared test helpers: a fake collection service and agent configuration.

#![allow(dead_code)]

use attend_agent::config::Config;
use attend_engine::DeviceMeta;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::path::Path as FsPath;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_KEY: &str = "test-key-0000-1234";

/// How long submissions stall in [`Mode::Slow`].
pub const SLOW_RESPONSE: Duration = Duration::from_secs(3);

/// How the fake service answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every record acknowledged
    AckAll,
    /// Only the first record of each batch appears in the results
    AckFirst,
    /// Health fails with 503
    Down,
    /// Health fine, submissions answered with this status
    SubmitStatus(u16),
    /// Every call answered with 401
    Unauthorized,
    /// Health fine, submissions stall for [`SLOW_RESPONSE`] before acking
    Slow,
    /// Health fine, submissions answered 200 with a body that is not JSON
    Garbage,
}

#[derive(Debug)]
pub struct FakeState {
    pub mode: Mutex<Mode>,
    pub batches: Mutex<Vec<Value>>,
    pub singles: Mutex<Vec<Value>>,
    pub headers: Mutex<Vec<(String, String)>>,
    pub health_calls: AtomicUsize,
    pub registrations: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

/// A collection service bound to a random local port.
pub struct FakeService {
    pub url: String,
    pub state: Arc<FakeState>,
}

impl FakeService {
    pub async fn start(mode: Mode) -> Self {
        let state = Arc::new(FakeState {
            mode: Mutex::new(mode),
            batches: Mutex::new(Vec::new()),
            singles: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
            health_calls: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/health", get(health))
            .route("/attendance", post(submit_one))
            .route("/attendance/batch", post(submit_batch))
            .route("/devices/register", post(register))
            .route("/devices/heartbeat", post(heartbeat))
            .route("/devices/{id}", get(device_info))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.state.mode.lock().unwrap() = mode;
    }

    pub fn batches(&self) -> Vec<Value> {
        self.state.batches.lock().unwrap().clone()
    }

    pub fn singles(&self) -> Vec<Value> {
        self.state.singles.lock().unwrap().clone()
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> usize {
        self.state.registrations.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Vec<(String, String)> {
        self.state.headers.lock().unwrap().clone()
    }
}

/// URL of a port nothing listens on.
pub async fn closed_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn device() -> DeviceMeta {
    DeviceMeta::new("gate-01", "North Gate", "Building A")
}

/// Agent configuration pointing at `url` with storage under `dir`.
pub fn config(url: &str, dir: &FsPath) -> Config {
    let mut config = Config::new(device(), url, API_KEY);
    config.storage_path = dir.join("attendance.json");
    config.request_timeout = Duration::from_secs(2);
    config.lock_timeout = Duration::from_millis(500);
    config.sync.sync_interval = Duration::from_secs(3600);
    config.debounce_interval = Duration::from_secs(2);
    config.drain_timeout = Duration::from_secs(2);
    config
}

/// Poll a condition until it holds or a few seconds pass.
#[macro_export]
macro_rules! eventually {
    ($cond:expr) => {{
        let mut held = false;
        for _ in 0..100 {
            if $cond {
                held = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        }
        held
    }};
}

fn mode(state: &FakeState) -> Mode {
    *state.mode.lock().unwrap()
}

fn remember_headers(state: &FakeState, headers: &HeaderMap) {
    let seen = ["authorization", "x-device-id"]
        .iter()
        .filter_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
    *state.headers.lock().unwrap() = seen;
}

async fn health(State(state): State<Arc<FakeState>>) -> (StatusCode, Json<Value>) {
    state.health_calls.fetch_add(1, Ordering::SeqCst);
    match mode(&state) {
        Mode::Down => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "down"}))),
        Mode::Unauthorized => (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"}))),
        _ => (StatusCode::OK, Json(json!({"status": "ok"}))),
    }
}

async fn submit_one(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    remember_headers(&state, &headers);
    match mode(&state) {
        Mode::AckAll | Mode::AckFirst => {
            state.singles.lock().unwrap().push(body);
            StatusCode::CREATED
        }
        Mode::SubmitStatus(code) => {
            StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        Mode::Unauthorized => StatusCode::UNAUTHORIZED,
        Mode::Down => StatusCode::SERVICE_UNAVAILABLE,
        Mode::Slow => {
            tokio::time::sleep(SLOW_RESPONSE).await;
            StatusCode::CREATED
        }
        Mode::Garbage => StatusCode::OK,
    }
}

async fn submit_batch(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    remember_headers(&state, &headers);
    let ids: Vec<Value> = body["records"]
        .as_array()
        .map(|records| records.iter().map(|r| r["recordId"].clone()).collect())
        .unwrap_or_default();

    let mode = mode(&state);
    let results: Vec<Value> = match mode {
        Mode::AckAll => ids
            .iter()
            .map(|id| json!({"recordId": id, "success": true}))
            .collect(),
        Mode::AckFirst => ids
            .iter()
            .take(1)
            .map(|id| json!({"recordId": id, "success": true}))
            .collect(),
        Mode::SubmitStatus(code) => {
            return (
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(json!({"error": "rejected"})),
            )
                .into_response()
        }
        Mode::Unauthorized => return (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response(),
        Mode::Down => return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({}))).into_response(),
        Mode::Slow => {
            tokio::time::sleep(SLOW_RESPONSE).await;
            ids.iter()
                .map(|id| json!({"recordId": id, "success": true}))
                .collect()
        }
        Mode::Garbage => {
            state.batches.lock().unwrap().push(body);
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html")],
                "<html>upstream proxy error</html>",
            )
                .into_response();
        }
    };

    state.batches.lock().unwrap().push(body);
    (StatusCode::OK, Json(json!({ "results": results }))).into_response()
}

async fn register(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> StatusCode {
    if mode(&state) == Mode::Unauthorized {
        return StatusCode::UNAUTHORIZED;
    }
    assert!(body["metadata"]["softwareVersion"].is_string());
    state.registrations.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn heartbeat(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> StatusCode {
    assert_eq!(body["deviceId"], "gate-01");
    state.heartbeats.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn device_info(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"deviceId": id, "status": "active"}))
}
