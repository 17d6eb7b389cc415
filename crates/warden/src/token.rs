// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token expiry arithmetic and structural checks.
//!
//! Everything here is pure apart from reading the wall clock.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;

/// Default proactive-refresh margin: two hours before hard expiry.
pub const DEFAULT_REFRESH_BUFFER_SECS: u64 = 2 * 3600;

/// Lifetime assumed when the service omits one.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 86_400;

/// Current unix time in seconds.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Raw credential values. Only the session manager and the credential store
/// ever hold these.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry, unix seconds.
    pub expires_at: Option<i64>,
}

impl Credentials {
    pub fn lifecycle(&self) -> TokenLifecycle {
        TokenLifecycle::new(self.expires_at)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Validity checks over an access token's expiry.
///
/// A token with no known expiry is never valid and always expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifecycle {
    expires_at: Option<i64>,
}

impl TokenLifecycle {
    pub fn new(expires_at: Option<i64>) -> Self {
        Self { expires_at }
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// True iff `now < expires_at - buffer_secs`.
    pub fn is_valid(&self, buffer_secs: u64) -> bool {
        self.is_valid_at(epoch_secs(), buffer_secs)
    }

    pub fn is_valid_at(&self, now: i64, buffer_secs: u64) -> bool {
        let buffer = i64::try_from(buffer_secs).unwrap_or(i64::MAX);
        match self.expires_at {
            Some(exp) => now < exp.saturating_sub(buffer),
            None => false,
        }
    }

    /// Hard expiry, ignoring any buffer.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(epoch_secs())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(exp) => now >= exp,
            None => true,
        }
    }

    /// Seconds until hard expiry, clamped at zero.
    pub fn remaining_seconds(&self) -> Option<i64> {
        self.remaining_seconds_at(epoch_secs())
    }

    pub fn remaining_seconds_at(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|exp| exp.saturating_sub(now).max(0))
    }
}

/// Structural classification of a raw token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenShape {
    /// No embedded claims; only the service can judge it.
    Opaque,
    /// Three-segment token whose payload carries `exp` and a subject.
    Structured { subject: String, expires_at: i64 },
    /// Looks self-describing but cannot be decoded or lacks required claims.
    Malformed,
}

/// Classify `token` without any network call.
pub fn inspect(token: &str) -> TokenShape {
    if token.trim().is_empty() {
        return TokenShape::Malformed;
    }
    if !token.contains('.') {
        return TokenShape::Opaque;
    }

    let segments: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = segments.as_slice() else {
        return TokenShape::Malformed;
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return TokenShape::Malformed;
    }

    let Some(claims) = decode_segment(payload) else {
        return TokenShape::Malformed;
    };
    let expires_at = claims.get("exp").and_then(serde_json::Value::as_i64);
    let subject = ["sub", "id"].iter().find_map(|k| match claims.get(*k) {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    });
    match (subject, expires_at) {
        (Some(subject), Some(expires_at)) => TokenShape::Structured { subject, expires_at },
        _ => TokenShape::Malformed,
    }
}

/// True iff `token` is a well-formed self-describing token.
pub fn verify_structure(token: &str) -> bool {
    matches!(inspect(token), TokenShape::Structured { .. })
}

fn decode_segment(segment: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let trimmed = segment.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(trimmed).or_else(|_| STANDARD_NO_PAD.decode(trimmed)).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
