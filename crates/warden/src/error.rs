// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced to callers of the session manager.
///
/// None of these are fatal to the process; the worst outcome of any of them
/// is a forced transition to the guest state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidCredentials,
    AccessDenied,
    NetworkUnavailable,
    ServerError,
    SessionExpired,
    MalformedToken,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            Self::ServerError => "SERVER_ERROR",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Message shown to the user when no server-provided message exists.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "The identifier or secret is incorrect.",
            Self::AccessDenied => "This account is not allowed to sign in.",
            Self::NetworkUnavailable => "Could not reach the identity service.",
            Self::ServerError => "The identity service reported an internal error.",
            Self::SessionExpired => "Your session has expired. Please sign in again.",
            Self::MalformedToken => "The stored token is malformed.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    /// Whether a refresh that failed with this code may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable | Self::ServerError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure returned from explicit, user-triggered operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: ErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<ErrorCode> for AuthError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }
}
