// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::client::Timeouts;

/// Longest allowed background check interval.
pub const MAX_CHECK_INTERVAL_SECS: u64 = 3600;

/// Session and identity-service tuning.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the identity service (endpoints are appended, e.g. `/auth/login`).
    #[arg(long, default_value = "http://127.0.0.1:8080/api", env = "WARDEN_API_URL")]
    pub api_url: String,

    /// Background validity check interval in seconds (capped at one hour).
    #[arg(long, default_value_t = 1800, env = "WARDEN_CHECK_INTERVAL_SECS")]
    pub check_interval_secs: u64,

    /// Refresh this many seconds before the access token expires.
    #[arg(long, default_value_t = 7200, env = "WARDEN_REFRESH_BUFFER_SECS")]
    pub refresh_buffer_secs: u64,

    /// Login request timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "WARDEN_LOGIN_TIMEOUT_MS")]
    pub login_timeout_ms: u64,

    /// Refresh request timeout in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "WARDEN_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Verification (`/auth/check`) timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "WARDEN_VERIFY_TIMEOUT_MS")]
    pub verify_timeout_ms: u64,

    /// Logout notification timeout in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "WARDEN_LOGOUT_TIMEOUT_MS")]
    pub logout_timeout_ms: u64,

    /// Retries after a network failure during refresh.
    #[arg(long, default_value_t = 5, env = "WARDEN_REFRESH_MAX_RETRIES")]
    pub refresh_max_retries: u32,

    /// Initial refresh retry backoff in milliseconds (doubles per retry).
    #[arg(long, default_value_t = 1_000, env = "WARDEN_REFRESH_BACKOFF_MS")]
    pub refresh_backoff_ms: u64,

    /// Initial delay before retrying a refresh the server failed (doubles per attempt).
    #[arg(long, default_value_t = 300, env = "WARDEN_DEFERRED_RETRY_SECS")]
    pub deferred_retry_secs: u64,

    /// Maximum number of scheduled retries after server failures.
    #[arg(long, default_value_t = 5, env = "WARDEN_DEFERRED_MAX_ATTEMPTS")]
    pub deferred_max_attempts: u32,

    /// Directory for the non-secret backup file.
    #[arg(long, env = "WARDEN_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Service name under which tokens are stored in the OS keyring.
    #[arg(long, default_value = "warden", env = "WARDEN_KEYRING_SERVICE")]
    pub keyring_service: String,
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("--api-url must be an http(s) URL, got {url:?}");
        }
        if self.check_interval_secs == 0 {
            anyhow::bail!("--check-interval-secs must be positive");
        }
        if self.refresh_backoff_ms == 0 || self.deferred_retry_secs == 0 {
            anyhow::bail!("retry delays must be positive");
        }
        for (name, ms) in [
            ("--login-timeout-ms", self.login_timeout_ms),
            ("--refresh-timeout-ms", self.refresh_timeout_ms),
            ("--verify-timeout-ms", self.verify_timeout_ms),
            ("--logout-timeout-ms", self.logout_timeout_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{name} must be positive");
            }
        }
        if self.keyring_service.trim().is_empty() {
            anyhow::bail!("--keyring-service must not be empty");
        }
        Ok(())
    }

    /// Background check interval, capped at [`MAX_CHECK_INTERVAL_SECS`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.clamp(1, MAX_CHECK_INTERVAL_SECS))
    }

    pub fn refresh_backoff(&self) -> Duration {
        Duration::from_millis(self.refresh_backoff_ms)
    }

    pub fn deferred_retry_delay(&self) -> Duration {
        Duration::from_secs(self.deferred_retry_secs)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            login: Duration::from_millis(self.login_timeout_ms),
            refresh: Duration::from_millis(self.refresh_timeout_ms),
            verify: Duration::from_millis(self.verify_timeout_ms),
            logout: Duration::from_millis(self.logout_timeout_ms),
        }
    }

    /// Resolve the backup directory.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/warden`, then
    /// `$HOME/.local/state/warden`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("warden");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/warden");
        }
        PathBuf::from(".warden")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.state_dir().join("session-backup.json")
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080/api".into(),
            check_interval_secs: 1800,
            refresh_buffer_secs: crate::token::DEFAULT_REFRESH_BUFFER_SECS,
            login_timeout_ms: 30_000,
            refresh_timeout_ms: 30_000,
            verify_timeout_ms: 5_000,
            logout_timeout_ms: 5_000,
            refresh_max_retries: 5,
            refresh_backoff_ms: 1_000,
            deferred_retry_secs: 300,
            deferred_max_attempts: 5,
            state_dir: None,
            keyring_service: "warden".into(),
        }
    }
}

/// Credential and session manager for the identity service.
#[derive(Debug, Parser)]
#[command(name = "warden", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub session: SessionConfig,

    /// Log format (json or text).
    #[arg(long, env = "WARDEN_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WARDEN_LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Sign in; prompts for anything not given on the command line.
    Login {
        #[arg(long, env = "WARDEN_IDENTIFIER")]
        identifier: Option<String>,
        #[arg(long, env = "WARDEN_SECRET", hide_env_values = true)]
        secret: Option<String>,
    },
    /// Sign out and clear stored credentials.
    Logout,
    /// Print the current session as JSON.
    Status {
        /// Confirm the session with the identity service first.
        #[arg(long)]
        verify: bool,
    },
    /// Refresh the access token now.
    Refresh,
    /// Print the Authorization header for outbound requests.
    Header,
    /// Check whether the current session may use a feature.
    Check { feature: String },
    /// Print the provisioned API key.
    ApiKey,
    /// Keep the session fresh in the foreground, printing events as JSON lines.
    Watch,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        self.session.validate()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
