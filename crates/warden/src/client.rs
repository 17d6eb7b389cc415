// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the remote identity service.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::state::UserProfile;

/// Per-endpoint request timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub login: Duration,
    pub refresh: Duration,
    pub verify: Duration,
    pub logout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login: Duration::from_secs(30),
            refresh: Duration::from_secs(30),
            verify: Duration::from_secs(5),
            logout: Duration::from_secs(5),
        }
    }
}

/// Classified failure of a call to the identity service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("rejected {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Error code for a failure outside the login flow.
    ///
    /// A 401 here means the presented token was refused, so it maps to
    /// [`ErrorCode::SessionExpired`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized(_) => ErrorCode::SessionExpired,
            Self::Forbidden(_) => ErrorCode::AccessDenied,
            Self::Server { .. } => ErrorCode::ServerError,
            Self::Network(_) => ErrorCode::NetworkUnavailable,
            Self::Rejected { .. } | Self::Malformed(_) => ErrorCode::Unknown,
        }
    }

    /// Error code for a failed login attempt.
    pub fn login_code(&self) -> ErrorCode {
        match self {
            Self::Unauthorized(_) => ErrorCode::InvalidCredentials,
            other => other.code(),
        }
    }

    /// Server-provided message, or the transport error text.
    pub fn message(&self) -> &str {
        match self {
            Self::Unauthorized(m) | Self::Forbidden(m) | Self::Network(m) | Self::Malformed(m) => m,
            Self::Server { message, .. } | Self::Rejected { message, .. } => message,
        }
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Successful login payload.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in_seconds: Option<i64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Successful refresh payload. A missing refresh token means the old one
/// stays in use.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in_seconds: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CheckBody {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyBody {
    #[serde(default, alias = "apiKey", alias = "key")]
    api_key_full: Option<String>,
}

/// HTTP client wrapper for the identity service.
pub struct IdentityClient {
    base_url: String,
    timeouts: Timeouts,
    client: Client,
}

impl IdentityClient {
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> Self {
        crate::ensure_crypto();
        let client = Client::builder().build().unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, timeouts, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /auth/login`.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<LoginGrant, RemoteError> {
        let req = self.client.post(self.url("/auth/login")).json(&LoginRequest { identifier, secret });
        let body = send(req, self.timeouts.login).await?;
        unwrap_envelope(&body)
    }

    /// `POST /auth/refresh-token`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let req =
            self.client.post(self.url("/auth/refresh-token")).json(&RefreshRequest { refresh_token });
        let body = send(req, self.timeouts.refresh).await?;
        unwrap_envelope(&body)
    }

    /// `GET /auth/check`: who does this access token belong to.
    pub async fn check(&self, access_token: &str) -> Result<UserProfile, RemoteError> {
        let req = self.client.get(self.url("/auth/check")).bearer_auth(access_token);
        let body = send(req, self.timeouts.verify).await?;
        match unwrap_envelope::<CheckBody>(&body)? {
            CheckBody::Wrapped { user } | CheckBody::Bare(user) => Ok(user),
        }
    }

    /// `POST /auth/logout`. Callers treat failure as non-fatal.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut req = self
            .client
            .post(self.url("/auth/logout"))
            .json(&serde_json::json!({ "refreshToken": refresh_token }));
        if let Some(token) = access_token {
            req = req.bearer_auth(token);
        }
        send(req, self.timeouts.logout).await?;
        Ok(())
    }

    /// `GET /user/apikey`: the API key provisioned for this user, if any.
    pub async fn api_key(&self, access_token: &str) -> Result<Option<String>, RemoteError> {
        let req = self.client.get(self.url("/user/apikey")).bearer_auth(access_token);
        let body = send(req, self.timeouts.verify).await?;
        let parsed: ApiKeyBody = unwrap_envelope(&body)?;
        Ok(parsed.api_key_full.filter(|k| !k.is_empty()))
    }
}

async fn send(req: RequestBuilder, timeout: Duration) -> Result<String, RemoteError> {
    let resp = req.timeout(timeout).send().await.map_err(|e| RemoteError::Network(e.to_string()))?;
    let status = resp.status();
    let body = resp.text().await.map_err(|e| RemoteError::Network(e.to_string()))?;
    if status.is_success() {
        return Ok(body);
    }

    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned());
    Err(match status.as_u16() {
        401 => RemoteError::Unauthorized(message),
        403 => RemoteError::Forbidden(message),
        status @ 500..=599 => RemoteError::Server { status, message },
        status => RemoteError::Rejected { status, message },
    })
}

/// Accept both bare payloads and the service's `{success, data, message}`
/// envelope.
fn unwrap_envelope<T: DeserializeOwned>(body: &str) -> Result<T, RemoteError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        let message = error_message(body).unwrap_or_else(|| "request was not successful".into());
        return Err(RemoteError::Rejected { status: 200, message });
    }

    let inner = match value {
        Value::Object(mut map) => match map.remove("data") {
            Some(data @ Value::Object(_)) => data,
            Some(other) => {
                map.insert("data".into(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    };
    serde_json::from_value(inner).map_err(|e| RemoteError::Malformed(e.to_string()))
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message").or(Some(e))))?;
    message.as_str().filter(|m| !m.is_empty()).map(str::to_owned)
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
