// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh with network retries and deferred retries
//! after server failures.

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Phase, SessionManager};
use crate::client::{RemoteError, TokenGrant};
use crate::error::ErrorCode;
use crate::event::SessionEvent;
use crate::host::Severity;
use crate::state::SessionStateBuilder;
use crate::token::{inspect, Credentials, TokenShape};

const SIGN_IN_AGAIN: &str = "Sign in again";
const LATER: &str = "Later";

/// How a refresh call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New credentials are in place.
    Refreshed { expires_at: i64 },
    /// No refresh token is held; nothing was attempted.
    NoRefreshToken,
    /// The server failed but the current token is still usable; a retry is
    /// scheduled.
    Deferred { attempt: u32, delay: Duration },
    /// Refresh was impossible; the session continues on a re-verified or
    /// cached identity.
    Recovered { verified: bool },
    /// The refresh token was refused and the session is now guest.
    SignedOut,
    /// The refresh token was refused and the user postponed signing in again.
    ExpiryDeferred,
    /// The session ended or was replaced before the refresh finished, or the
    /// manager was disposed. Nothing was applied.
    Abandoned,
    Failed(ErrorCode),
}

impl RefreshOutcome {
    /// Whether the session is still usable after this outcome.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Refreshed { .. } | Self::Recovered { .. })
    }
}

/// Bookkeeping for retries scheduled after server failures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeferredRetry {
    /// Retries scheduled since the last successful refresh.
    pub attempts: u32,
    /// Delay of the retry currently pending, if any.
    pub pending: Option<Duration>,
}

impl SessionManager {
    /// Refresh the access token.
    ///
    /// Concurrent callers share one in-flight refresh: one request to the
    /// identity service and one resulting publication. A caller that joins
    /// an in-flight refresh gets that refresh's `silent` behaviour.
    pub async fn refresh(self: &Arc<Self>, silent: bool) -> RefreshOutcome {
        let flight = {
            let mut flights = self.flights.lock();
            if flights.scope.is_cancelled() {
                return RefreshOutcome::Abandoned;
            }
            match flights.current.as_ref() {
                Some(flight) => {
                    debug!("joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    let this = Arc::clone(self);
                    let scope = flights.scope.clone();
                    // Spawned so the refresh completes even if every caller
                    // stops waiting.
                    let handle = tokio::spawn(async move {
                        let outcome = tokio::select! {
                            biased;
                            outcome = this.run_refresh(silent, &scope) => outcome,
                            _ = scope.cancelled() => {
                                debug!("session ended during refresh, abandoning it");
                                RefreshOutcome::Abandoned
                            }
                        };
                        let mut flights = this.flights.lock();
                        // A cancelled scope has already cleared its flight.
                        if !scope.is_cancelled() {
                            flights.current = None;
                        }
                        outcome
                    });
                    let flight = async move {
                        handle.await.unwrap_or(RefreshOutcome::Failed(ErrorCode::Unknown))
                    }
                    .boxed()
                    .shared();
                    flights.current = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    async fn run_refresh(self: &Arc<Self>, silent: bool, scope: &CancellationToken) -> RefreshOutcome {
        let Some(refresh_token) = self.credentials.read().as_ref().and_then(|c| c.refresh_token.clone())
        else {
            debug!("no refresh token, skipping refresh");
            return RefreshOutcome::NoRefreshToken;
        };

        let prev_phase = self.phase();
        self.set_phase(Phase::Refreshing);

        let outcome = match self.refresh_with_retries(&refresh_token).await {
            Ok(grant) => self.commit(scope, || self.apply_grant(grant)),
            Err(RemoteError::Unauthorized(msg)) => {
                self.refresh_refused(scope, silent, prev_phase, &msg).await
            }
            Err(e @ RemoteError::Server { .. }) => self.refresh_server_error(scope, e).await,
            Err(e) => {
                warn!(err = %e, "refresh failed, attempting recovery");
                let code = e.code();
                match self.commit(scope, || {
                    self.emit(SessionEvent::RefreshFailed { code, message: e.to_string() })
                }) {
                    Some(()) => self.recover(scope).await,
                    None => None,
                }
            }
        };
        outcome.unwrap_or_else(|| {
            debug!("session ended during refresh, result discarded");
            RefreshOutcome::Abandoned
        })
    }

    /// Retry network failures with exponential backoff. Anything else is
    /// returned immediately.
    async fn refresh_with_retries(&self, refresh_token: &str) -> Result<TokenGrant, RemoteError> {
        let max_retries = self.config.refresh_max_retries;
        let mut backoff = self.config.refresh_backoff();
        let mut attempt = 0;

        loop {
            match self.client.refresh(refresh_token).await {
                Err(RemoteError::Network(msg)) if attempt < max_retries => {
                    attempt += 1;
                    debug!(attempt, delay_ms = backoff.as_millis() as u64, err = %msg, "refresh failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.shutdown.cancelled() => return Err(RemoteError::Network(msg)),
                    }
                    backoff = backoff.saturating_mul(2);
                }
                Err(RemoteError::Network(msg)) => {
                    warn!(attempts = attempt + 1, "refresh gave up after network failures");
                    return Err(RemoteError::Network(msg));
                }
                other => return other,
            }
        }
    }

    fn apply_grant(&self, grant: TokenGrant) -> RefreshOutcome {
        let shape = inspect(&grant.access_token);
        if shape == TokenShape::Malformed {
            warn!("identity service issued a malformed access token, discarding session");
            self.emit(SessionEvent::RefreshFailed {
                code: ErrorCode::MalformedToken,
                message: ErrorCode::MalformedToken.default_message().to_owned(),
            });
            self.invalidate();
            return RefreshOutcome::Failed(ErrorCode::MalformedToken);
        }

        let expires_at = super::expiry_from(grant.expires_in_seconds, &shape);
        let previous_refresh = self.credentials.read().as_ref().and_then(|c| c.refresh_token.clone());
        let creds = Credentials {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(previous_refresh),
            expires_at: Some(expires_at),
        };
        self.install_credentials(creds, None);
        self.reset_deferred();

        let next = SessionStateBuilder::from(&self.state()).with_expiry(Some(expires_at)).build();
        self.publish(next);
        self.set_phase(Phase::Authenticated);
        self.emit(SessionEvent::TokenRefreshed { expires_at: Some(expires_at) });
        info!(expires_at, "access token refreshed");
        RefreshOutcome::Refreshed { expires_at }
    }

    /// The refresh token itself was refused.
    async fn refresh_refused(
        &self,
        scope: &CancellationToken,
        silent: bool,
        prev_phase: Phase,
        msg: &str,
    ) -> Option<RefreshOutcome> {
        let signed_out = self.commit(scope, || {
            self.emit(SessionEvent::RefreshFailed {
                code: ErrorCode::SessionExpired,
                message: msg.to_owned(),
            });
            if silent {
                info!("refresh token refused, signing out");
                self.invalidate();
            }
            silent
        })?;
        if signed_out {
            return Some(RefreshOutcome::SignedOut);
        }

        let choice = self.ask(ErrorCode::SessionExpired.default_message(), &[SIGN_IN_AGAIN, LATER]).await;
        if choice.as_deref() == Some(SIGN_IN_AGAIN) {
            if scope.is_cancelled() {
                return None;
            }
            self.logout().await;
            Some(RefreshOutcome::SignedOut)
        } else {
            self.commit(scope, || {
                debug!("user postponed signing in again");
                self.set_phase(prev_phase);
                RefreshOutcome::ExpiryDeferred
            })
        }
    }

    /// Server failure: keep going on the current token while it is still
    /// usable and try again later, otherwise recover.
    async fn refresh_server_error(
        self: &Arc<Self>,
        scope: &CancellationToken,
        err: RemoteError,
    ) -> Option<RefreshOutcome> {
        let still_valid = self.commit(scope, || {
            self.emit(SessionEvent::RefreshFailed { code: err.code(), message: err.to_string() });
            self.lifecycle().is_valid(0)
        })?;

        if !still_valid {
            warn!(err = %err, "refresh failed and access token is no longer valid");
            return self.recover(scope).await;
        }

        self.commit(scope, || {
            self.set_phase(Phase::Authenticated);
            match self.schedule_deferred_retry() {
                Some((attempt, delay)) => {
                    warn!(err = %err, attempt, delay_secs = delay.as_secs(), "refresh failed, retry scheduled");
                    RefreshOutcome::Deferred { attempt, delay }
                }
                None => {
                    warn!(err = %err, "refresh failed and retry budget is exhausted");
                    self.host.notify(
                        Severity::Warning,
                        "Could not renew the session; it stays active until it expires.",
                    );
                    RefreshOutcome::Failed(ErrorCode::ServerError)
                }
            }
        })
    }

    /// Schedule the single pending retry. Returns the attempt number and
    /// delay, or `None` once the attempt budget is spent.
    fn schedule_deferred_retry(self: &Arc<Self>) -> Option<(u32, Duration)> {
        let mut tasks = self.tasks.lock();
        let mut deferred = self.deferred.lock();

        if let (Some(handle), Some(delay)) = (tasks.deferred.as_ref(), deferred.pending) {
            if !handle.is_finished() {
                return Some((deferred.attempts, delay));
            }
        }
        if deferred.attempts >= self.config.deferred_max_attempts || self.shutdown.is_cancelled() {
            return None;
        }

        let delay = self.config.deferred_retry_delay().saturating_mul(1 << deferred.attempts.min(16));
        deferred.attempts += 1;
        deferred.pending = Some(delay);
        let attempt = deferred.attempts;

        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tasks.deferred = Some(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
            let Some(manager) = weak.upgrade() else { return };
            // Release the slot first so a repeat failure can schedule the next retry.
            manager.tasks.lock().deferred = None;
            manager.deferred.lock().pending = None;
            debug!(attempt, "running deferred refresh");
            let outcome = manager.refresh(true).await;
            debug!(attempt, ?outcome, "deferred refresh finished");
        }));
        Some((attempt, delay))
    }

    /// Retry bookkeeping, for status reporting.
    pub fn deferred_retry(&self) -> DeferredRetry {
        *self.deferred.lock()
    }

    /// Cancel any pending retry and restore the full attempt budget.
    pub(super) fn reset_deferred(&self) {
        if let Some(handle) = self.tasks.lock().deferred.take() {
            handle.abort();
        }
        *self.deferred.lock() = DeferredRetry::default();
    }

    /// Ask the host a question without blocking the runtime.
    async fn ask(&self, message: &str, options: &[&str]) -> Option<String> {
        let host = Arc::clone(&self.host);
        let message = message.to_owned();
        let options: Vec<String> = options.iter().map(|o| (*o).to_owned()).collect();
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = options.iter().map(String::as_str).collect();
            host.prompt_choice(&message, &refs)
        })
        .await
        .ok()
        .flatten()
    }
}
