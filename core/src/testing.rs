//! In-process stand-in for the Kayzen API, for tests.
//!
//! Serves `POST /v1/auth/token` and records every other request. Report
//! endpoints answer with canned responses registered via [`FakeApi::respond`]
//! or [`FakeApi::respond_raw`], or a generic 200 echo when nothing is
//! registered.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::{Value, json};

use crate::client::Credentials;

const PREFIX: &str = "/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: String,
    /// Path below the API prefix, e.g. `/reports/r1/status`
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    /// `None` when the request carried no body
    pub body: Option<Value>,
}

#[derive(Clone)]
enum Canned {
    Json(Value),
    Raw(String),
}

impl Canned {
    fn render(self, status: StatusCode) -> Response {
        match self {
            Canned::Json(body) => (status, Json(body)).into_response(),
            Canned::Raw(body) => (status, body).into_response(),
        }
    }
}

#[derive(Default)]
struct FakeState {
    auth_calls: AtomicUsize,
    auth_status: AtomicU16,
    auth_body: Mutex<Option<Canned>>,
    expires_in: Mutex<Option<i64>>,
    last_auth_body: Mutex<Option<Value>>,
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<HashMap<String, (u16, Canned)>>,
}

pub struct FakeApi {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeApi {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        state.auth_status.store(200, Ordering::SeqCst);

        let app = Router::new()
            .route("/v1/auth/token", post(auth_token))
            .fallback(record)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake api listener");
        let addr = listener.local_addr().expect("fake api local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}{PREFIX}", self.addr)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            base_url: self.base_url(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
        }
    }

    pub fn set_auth_status(&self, status: u16) {
        self.state.auth_status.store(status, Ordering::SeqCst);
    }

    pub fn set_expires_in(&self, expires_in: Option<i64>) {
        *lock(&self.state.expires_in) = expires_in;
    }

    /// Replace the issued token payload with a fixed 2xx body.
    pub fn set_auth_body(&self, body: Value) {
        *lock(&self.state.auth_body) = Some(Canned::Json(body));
    }

    pub fn set_auth_raw_body(&self, body: &str) {
        *lock(&self.state.auth_body) = Some(Canned::Raw(body.to_string()));
    }

    pub fn respond(&self, method: &str, path: &str, status: u16, body: Value) {
        lock(&self.state.responses).insert(route_key(method, path), (status, Canned::Json(body)));
    }

    /// Answer with `body` verbatim, as `text/plain`. An empty string sends no body.
    pub fn respond_raw(&self, method: &str, path: &str, status: u16, body: &str) {
        lock(&self.state.responses).insert(
            route_key(method, path),
            (status, Canned::Raw(body.to_string())),
        );
    }

    pub fn auth_calls(&self) -> usize {
        self.state.auth_calls.load(Ordering::SeqCst)
    }

    pub fn last_auth_body(&self) -> Option<Value> {
        lock(&self.state.last_auth_body).clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_ascii_uppercase(), path)
}

async fn auth_token(State(state): State<Arc<FakeState>>, body: Bytes) -> Response {
    let n = state.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    *lock(&state.last_auth_body) = serde_json::from_slice(&body).ok();

    let status = state.auth_status.load(Ordering::SeqCst);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if !status.is_success() {
        return (status, Json(json!({ "error": "invalid credentials" }))).into_response();
    }
    if let Some(body) = lock(&state.auth_body).clone() {
        return body.render(status);
    }

    let mut payload = json!({ "token": format!("token-{n}") });
    if let Some(expires_in) = *lock(&state.expires_in) {
        payload["expires_in"] = json!(expires_in);
    }
    Json(payload).into_response()
}

async fn record(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path()
        .strip_prefix(PREFIX)
        .unwrap_or(uri.path())
        .to_string();
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let parsed_body = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string())),
        )
    };

    lock(&state.requests).push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().map(str::to_string),
        authorization: header(AUTHORIZATION),
        content_type: header(CONTENT_TYPE),
        body: parsed_body,
    });

    let canned = lock(&state.responses)
        .get(&route_key(method.as_str(), &path))
        .cloned();
    match canned {
        Some((status, body)) => {
            body.render(StatusCode::from_u16(status).unwrap_or(StatusCode::OK))
        }
        None => Json(json!({ "ok": true, "method": method.as_str(), "path": path })).into_response(),
    }
}
