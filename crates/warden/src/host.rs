// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host UI collaborator: prompts and notifications.
//!
//! The session manager only calls into the host at its decision points:
//! a refused refresh token, a failed login, and sign-out confirmation.

use std::fmt;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Credentials typed in by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Implemented by whatever presents the session to a human.
///
/// Prompt methods may block; the session manager calls them off the async
/// runtime.
pub trait HostUi: Send + Sync {
    fn prompt_credentials(&self) -> Option<LoginRequest>;
    fn notify(&self, severity: Severity, message: &str);
    /// Returns the selected option, or `None` if the prompt was dismissed.
    fn prompt_choice(&self, message: &str, options: &[&str]) -> Option<String>;
}

/// Host for unattended use: notifications go to the log, prompts are
/// always dismissed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessHost;

impl HostUi for HeadlessHost {
    fn prompt_credentials(&self) -> Option<LoginRequest> {
        None
    }

    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }

    fn prompt_choice(&self, message: &str, _options: &[&str]) -> Option<String> {
        info!(prompt = message, "no interactive host, dismissing prompt");
        None
    }
}
