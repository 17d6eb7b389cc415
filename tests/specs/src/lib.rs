// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end tests.
//!
//! Provides a stand-in identity service, helpers for driving the command
//! runner in-process, and a wrapper around the compiled `warden` binary.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Router;
use clap::Parser;
use parking_lot::Mutex;
use serde_json::{json, Value};

use warden::config::Cli;
use warden::host::HeadlessHost;
use warden::store::CredentialStore;

/// Resolve the path to the compiled `warden` binary.
pub fn warden_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("warden")
}

/// Address nothing listens on.
pub fn unreachable_url() -> anyhow::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(format!("http://127.0.0.1:{port}"))
}

// -- Identity service --------------------------------------------------------

#[derive(Default)]
struct Routes {
    replies: Mutex<HashMap<String, (u16, Value)>>,
    calls: Mutex<HashMap<String, u32>>,
    requests: AtomicU32,
}

/// Identity service on an ephemeral port. Each path answers with a fixed
/// reply that tests can swap at any time.
pub struct IdentityService {
    addr: SocketAddr,
    routes: Arc<Routes>,
}

impl IdentityService {
    pub async fn start() -> anyhow::Result<Self> {
        let routes = Arc::new(Routes::default());
        {
            let mut replies = routes.replies.lock();
            replies.insert(
                "/auth/login".into(),
                (
                    200,
                    json!({
                        "success": true,
                        "data": {
                            "accessToken": "access-1",
                            "refreshToken": "refresh-1",
                            "expiresIn": 86_400,
                            "user": { "id": "u-1", "name": "Ada", "role": "user", "permissions": [] }
                        }
                    }),
                ),
            );
            replies.insert(
                "/auth/refresh-token".into(),
                (200, json!({ "success": true, "data": { "accessToken": "access-2", "expiresIn": 86_400 } })),
            );
            replies.insert(
                "/auth/check".into(),
                (200, json!({ "success": true, "data": { "user": { "id": "u-1", "name": "Ada", "role": "user" } } })),
            );
            replies.insert("/auth/logout".into(), (200, json!({ "success": true })));
            replies.insert(
                "/user/apikey".into(),
                (200, json!({ "success": true, "data": { "apiKeyFull": "key-123" } })),
            );
        }

        let app = Router::new().fallback(answer).with_state(Arc::clone(&routes));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, routes })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn reply(&self, path: &str, status: u16, body: Value) {
        self.routes.replies.lock().insert(path.to_owned(), (status, body));
    }

    pub fn calls(&self, path: &str) -> u32 {
        self.routes.calls.lock().get(path).copied().unwrap_or(0)
    }

    /// Total requests served on any path.
    pub fn requests(&self) -> u32 {
        self.routes.requests.load(Ordering::SeqCst)
    }
}

async fn answer(State(routes): State<Arc<Routes>>, uri: Uri) -> (StatusCode, String) {
    routes.requests.fetch_add(1, Ordering::SeqCst);
    let path = uri.path().to_owned();
    *routes.calls.lock().entry(path.clone()).or_default() += 1;
    match routes.replies.lock().get(&path) {
        Some((status, body)) => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body.to_string(),
        ),
        None => (StatusCode::NOT_FOUND, json!({ "message": "no such route" }).to_string()),
    }
}

pub fn failure(message: &str) -> Value {
    json!({ "success": false, "message": message })
}

// -- In-process runs ---------------------------------------------------------

/// Runs subcommands in-process against one shared in-memory store, the way
/// consecutive invocations share the OS keyring.
pub struct Session {
    api_url: String,
    store: Arc<CredentialStore>,
}

impl Session {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), store: Arc::new(CredentialStore::in_memory()) }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Run `warden <args>` and return its exit code.
    pub async fn run(&self, args: &[&str]) -> anyhow::Result<i32> {
        let mut argv = vec!["warden", "--api-url", self.api_url.as_str(), "--refresh-backoff-ms", "10"];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;
        cli.validate()?;
        warden::cli::run_with(cli, Arc::clone(&self.store), Arc::new(HeadlessHost)).await
    }
}

// -- Binary runs -------------------------------------------------------------

/// The compiled binary, isolated to a scratch state directory and its own
/// keyring service name.
pub struct Warden {
    api_url: String,
    state_dir: tempfile::TempDir,
    service: String,
}

impl Warden {
    pub fn new(api_url: impl Into<String>) -> anyhow::Result<Self> {
        let binary = warden_binary();
        anyhow::ensure!(binary.exists(), "warden binary not found at {}", binary.display());
        let state_dir = tempfile::tempdir()?;
        let service = format!("warden-spec-{}-{}", std::process::id(), unique());
        Ok(Self { api_url: api_url.into(), state_dir, service })
    }

    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    pub fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let output = Command::new(warden_binary())
            .arg("--api-url")
            .arg(&self.api_url)
            .arg("--state-dir")
            .arg(self.state_dir.path())
            .arg("--keyring-service")
            .arg(&self.service)
            .args(args)
            .env("WARDEN_LOG_LEVEL", "warn")
            .stdin(Stdio::null())
            .output()?;
        Ok(output)
    }

    /// Run and parse stdout as one JSON document.
    pub fn run_json(&self, args: &[&str]) -> anyhow::Result<(i32, Value)> {
        let output = self.run(args)?;
        let code = output.status.code().unwrap_or(-1);
        let value = serde_json::from_slice(&output.stdout)?;
        Ok((code, value))
    }
}

fn unique() -> u32 {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    NEXT.fetch_add(1, Ordering::SeqCst)
}
