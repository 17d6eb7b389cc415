// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted identity service, a recording
//! host, and token helpers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::config::SessionConfig;
use crate::host::{HostUi, LoginRequest, Severity};
use crate::manager::SessionManager;
use crate::store::CredentialStore;
use crate::token::epoch_secs;

/// Endpoints served by [`MockIdentity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Login,
    Refresh,
    Check,
    Logout,
    ApiKey,
}

/// Responses for one endpoint, served in order; the last one repeats.
struct Script {
    responses: Mutex<Vec<(u16, Value)>>,
    calls: AtomicU32,
    delay: Mutex<Duration>,
    last_body: Mutex<Option<Value>>,
    last_bearer: Mutex<Option<String>>,
}

impl Script {
    fn new(status: u16, body: Value) -> Self {
        Self {
            responses: Mutex::new(vec![(status, body)]),
            calls: AtomicU32::new(0),
            delay: Mutex::new(Duration::ZERO),
            last_body: Mutex::new(None),
            last_bearer: Mutex::new(None),
        }
    }

    async fn reply(&self, headers: &HeaderMap, body: String) -> (StatusCode, String) {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        *self.last_body.lock() = serde_json::from_str(&body).ok();
        *self.last_bearer.lock() = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (status, body) = {
            let responses = self.responses.lock();
            responses
                .get(idx)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or((500, json!({})))
        };
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body.to_string(),
        )
    }
}

struct Routes {
    login: Script,
    refresh: Script,
    check: Script,
    logout: Script,
    api_key: Script,
}

impl Routes {
    fn script(&self, endpoint: Endpoint) -> &Script {
        match endpoint {
            Endpoint::Login => &self.login,
            Endpoint::Refresh => &self.refresh,
            Endpoint::Check => &self.check,
            Endpoint::Logout => &self.logout,
            Endpoint::ApiKey => &self.api_key,
        }
    }
}

/// In-process identity service on an ephemeral port.
///
/// Every endpoint succeeds by default; tests script the failures they need.
pub struct MockIdentity {
    addr: SocketAddr,
    routes: Arc<Routes>,
}

impl MockIdentity {
    pub async fn start() -> anyhow::Result<Self> {
        let routes = Arc::new(Routes {
            login: Script::new(200, login_body("access-1", "refresh-1", 86_400, "user")),
            refresh: Script::new(200, refresh_body("access-2", Some("refresh-2"), 86_400)),
            check: Script::new(200, user_body("u-1", "Ada", "user")),
            logout: Script::new(200, json!({ "success": true })),
            api_key: Script::new(200, json!({ "success": true, "data": { "apiKeyFull": "key-123" } })),
        });

        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/refresh-token", post(refresh))
            .route("/auth/check", get(check))
            .route("/auth/logout", post(logout))
            .route("/user/apikey", get(api_key))
            .with_state(Arc::clone(&routes));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, routes })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Replace the scripted responses for `endpoint`.
    pub fn script(&self, endpoint: Endpoint, responses: Vec<(u16, Value)>) {
        *self.routes.script(endpoint).responses.lock() = responses;
    }

    /// Hold every response from `endpoint` for `delay`.
    pub fn delay(&self, endpoint: Endpoint, delay: Duration) {
        *self.routes.script(endpoint).delay.lock() = delay;
    }

    pub fn calls(&self, endpoint: Endpoint) -> u32 {
        self.routes.script(endpoint).calls.load(Ordering::SeqCst)
    }

    /// JSON body of the most recent request to `endpoint`.
    pub fn last_body(&self, endpoint: Endpoint) -> Option<Value> {
        self.routes.script(endpoint).last_body.lock().clone()
    }

    /// Bearer token of the most recent request to `endpoint`.
    pub fn last_bearer(&self, endpoint: Endpoint) -> Option<String> {
        self.routes.script(endpoint).last_bearer.lock().clone()
    }
}

async fn login(State(r): State<Arc<Routes>>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    r.login.reply(&headers, body).await
}

async fn refresh(State(r): State<Arc<Routes>>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    r.refresh.reply(&headers, body).await
}

async fn check(State(r): State<Arc<Routes>>, headers: HeaderMap) -> (StatusCode, String) {
    r.check.reply(&headers, String::new()).await
}

async fn logout(State(r): State<Arc<Routes>>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    r.logout.reply(&headers, body).await
}

async fn api_key(State(r): State<Arc<Routes>>, headers: HeaderMap) -> (StatusCode, String) {
    r.api_key.reply(&headers, String::new()).await
}

// -- Response bodies ---------------------------------------------------------

pub fn user_json(id: &str, name: &str, role: &str) -> Value {
    json!({ "id": id, "name": name, "role": role, "permissions": [] })
}

/// `/auth/check` body in the service envelope.
pub fn user_body(id: &str, name: &str, role: &str) -> Value {
    json!({ "success": true, "data": { "user": user_json(id, name, role) } })
}

pub fn login_body(access: &str, refresh: &str, expires_in: i64, role: &str) -> Value {
    json!({
        "success": true,
        "data": {
            "accessToken": access,
            "refreshToken": refresh,
            "expiresIn": expires_in,
            "user": user_json("u-1", "Ada", role),
        }
    })
}

pub fn refresh_body(access: &str, refresh: Option<&str>, expires_in: i64) -> Value {
    let mut data = json!({ "accessToken": access, "expiresIn": expires_in });
    if let (Some(refresh), Some(map)) = (refresh, data.as_object_mut()) {
        map.insert("refreshToken".into(), Value::String(refresh.to_owned()));
    }
    json!({ "success": true, "data": data })
}

pub fn error_body(message: &str) -> Value {
    json!({ "success": false, "message": message })
}

/// Unsigned three-segment token carrying `sub` and `exp`.
pub fn jwt(subject: &str, expires_at: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": subject, "exp": expires_at }).to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

// -- Host --------------------------------------------------------------------

/// Host that records everything it is told and answers prompts from a script.
#[derive(Default)]
pub struct RecordingHost {
    pub notifications: Mutex<Vec<(Severity, String)>>,
    pub prompts: Mutex<Vec<(String, Vec<String>)>>,
    pub choice: Mutex<Option<String>>,
    pub credentials: Mutex<Option<LoginRequest>>,
}

impl RecordingHost {
    pub fn answering(choice: &str) -> Arc<Self> {
        let host = Self::default();
        *host.choice.lock() = Some(choice.to_owned());
        Arc::new(host)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn notified(&self, severity: Severity) -> Vec<String> {
        self.notifications
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl HostUi for RecordingHost {
    fn prompt_credentials(&self) -> Option<LoginRequest> {
        self.credentials.lock().clone()
    }

    fn notify(&self, severity: Severity, message: &str) {
        self.notifications.lock().push((severity, message.to_owned()));
    }

    fn prompt_choice(&self, message: &str, options: &[&str]) -> Option<String> {
        self.prompts.lock().push((message.to_owned(), options.iter().map(|o| (*o).to_owned()).collect()));
        self.choice.lock().clone()
    }
}

// -- Managers ----------------------------------------------------------------

/// Config pointed at `base_url` with retry delays short enough for tests.
pub fn test_config(base_url: &str) -> SessionConfig {
    SessionConfig {
        api_url: base_url.to_owned(),
        check_interval_secs: 3600,
        refresh_max_retries: 2,
        refresh_backoff_ms: 10,
        deferred_retry_secs: 1,
        deferred_max_attempts: 2,
        login_timeout_ms: 2_000,
        refresh_timeout_ms: 2_000,
        verify_timeout_ms: 2_000,
        logout_timeout_ms: 2_000,
        ..SessionConfig::default()
    }
}

/// Manager against `mock` with an in-memory store.
pub fn manager_for(
    mock: &MockIdentity,
    host: Arc<dyn HostUi>,
) -> (Arc<SessionManager>, Arc<CredentialStore>) {
    let store = Arc::new(CredentialStore::in_memory());
    let manager = SessionManager::from_config(test_config(&mock.base_url()), Arc::clone(&store), host);
    (manager, store)
}

/// Unix seconds `offset` from now.
pub fn from_now(offset: i64) -> i64 {
    epoch_secs() + offset
}

/// Address nothing listens on.
pub fn unreachable_url() -> anyhow::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}
