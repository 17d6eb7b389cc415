// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine: login, refresh, recovery, logout and the
//! background validity check.
//!
//! Credentials live in memory here and durably in the [`CredentialStore`];
//! nothing else writes either. The published [`SessionState`] is replaced
//! wholesale on every transition and handed to readers as an immutable
//! snapshot.

mod monitor;
mod recovery;
mod refresh;

use std::fmt;
use std::sync::{Arc, OnceLock};

use futures_util::future::{BoxFuture, Shared};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{IdentityClient, LoginGrant, RemoteError};
use crate::config::SessionConfig;
use crate::error::{AuthError, ErrorCode};
use crate::event::SessionEvent;
use crate::facade::SessionFacade;
use crate::host::{HostUi, Severity};
use crate::state::{compare, SessionState, SessionStateBuilder, UserProfile};
use crate::store::{keys, CredentialStore, StoreError};
use crate::token::{epoch_secs, inspect, Credentials, TokenShape, DEFAULT_EXPIRES_IN_SECS};

pub use self::monitor::CheckOutcome;
pub use self::refresh::{DeferredRetry, RefreshOutcome};

/// Skip a background round when more than this much validity remains.
pub const SKIP_WINDOW_SECS: i64 = 3600;

const EVENT_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Guest,
    Authenticating,
    Authenticated,
    Refreshing,
    Recovering,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Refreshing => "refreshing",
            Self::Recovering => "recovering",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`SessionManager::logout`]. Local sign-out always happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutReport {
    /// Whether the identity service acknowledged the logout.
    pub remote_notified: bool,
    /// Set when the stored credentials could not all be removed.
    pub store_error: Option<String>,
}

type RefreshFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

/// The refresh in flight, if any, and the scope it runs under.
///
/// `scope` is cancelled whenever the signed-in session ends or is replaced.
/// It is only ever cancelled with this struct locked, and `current` is
/// cleared at the same time, so a stored flight always belongs to a live
/// scope.
struct Flights {
    scope: CancellationToken,
    current: Option<RefreshFlight>,
}

#[derive(Default)]
struct Tasks {
    monitor: Option<JoinHandle<()>>,
    deferred: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    config: SessionConfig,
    client: IdentityClient,
    store: Arc<CredentialStore>,
    host: Arc<dyn HostUi>,
    credentials: Arc<RwLock<Option<Credentials>>>,
    phase: RwLock<Phase>,
    state_tx: watch::Sender<Arc<SessionState>>,
    event_tx: broadcast::Sender<SessionEvent>,
    // Held while comparing, replacing and announcing a snapshot so events
    // reach subscribers in publication order.
    publish_lock: Mutex<()>,
    // Held by login, logout and every refresh commit while they change
    // credentials, so a stale refresh result never lands on top of them.
    session_lock: ReentrantMutex<()>,
    flights: Mutex<Flights>,
    deferred: Mutex<DeferredRetry>,
    tasks: Mutex<Tasks>,
    shutdown: CancellationToken,
    facade: OnceLock<SessionFacade>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        client: IdentityClient,
        store: Arc<CredentialStore>,
        host: Arc<dyn HostUi>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(Arc::new(SessionState::guest()));
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        let flights = Flights { scope: shutdown.child_token(), current: None };
        Arc::new(Self {
            config,
            client,
            store,
            host,
            credentials: Arc::new(RwLock::new(None)),
            phase: RwLock::new(Phase::Guest),
            state_tx,
            event_tx,
            publish_lock: Mutex::new(()),
            session_lock: ReentrantMutex::new(()),
            flights: Mutex::new(flights),
            deferred: Mutex::new(DeferredRetry::default()),
            tasks: Mutex::new(Tasks::default()),
            shutdown,
            facade: OnceLock::new(),
        })
    }

    /// Build the identity client from `config` as well.
    pub fn from_config(
        config: SessionConfig,
        store: Arc<CredentialStore>,
        host: Arc<dyn HostUi>,
    ) -> Arc<Self> {
        let client = IdentityClient::new(config.api_url.clone(), config.timeouts());
        Self::new(config, client, store, host)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state_tx.borrow())
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<SessionState>> {
        self.state_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// The shared facade for this manager. Every call returns the same instance.
    pub fn facade(&self) -> SessionFacade {
        self.facade
            .get_or_init(|| {
                SessionFacade::new(self.state_tx.subscribe(), Arc::clone(&self.credentials))
            })
            .clone()
    }

    /// Expiry arithmetic for the access token currently held.
    pub fn lifecycle(&self) -> crate::token::TokenLifecycle {
        crate::token::TokenLifecycle::new(self.credentials.read().as_ref().and_then(|c| c.expires_at))
    }

    /// Whether a refresh token is held.
    pub fn has_refresh_token(&self) -> bool {
        self.credentials.read().as_ref().is_some_and(|c| c.refresh_token.is_some())
    }

    // -- Login ---------------------------------------------------------------

    /// Sign in. On failure the session falls back to guest.
    pub async fn login(
        self: &Arc<Self>,
        identifier: &str,
        secret: &str,
    ) -> Result<Arc<SessionState>, AuthError> {
        // A refresh still running belongs to whatever session came before.
        self.end_scope();
        self.set_phase(Phase::Authenticating);
        let result = match self.client.login(identifier, secret).await {
            Ok(grant) => self.complete_login(grant).await,
            Err(e) => Err(AuthError::new(e.login_code(), display_message(&e, e.login_code()))),
        };

        match result {
            Ok(state) => {
                info!(user_id = state.user_id().unwrap_or_default(), role = %state.role(), "login succeeded");
                self.emit(SessionEvent::LoginSucceeded { user_id: state.user_id().map(str::to_owned) });
                self.start_monitor();
                Ok(state)
            }
            Err(e) => {
                warn!(code = %e.code, "login failed: {}", e.message);
                self.invalidate();
                self.emit(SessionEvent::LoginFailed { code: e.code, message: e.message.clone() });
                self.host.notify(Severity::Error, &format!("Sign-in failed: {}", e.message));
                Err(e)
            }
        }
    }

    async fn complete_login(&self, grant: LoginGrant) -> Result<Arc<SessionState>, AuthError> {
        let shape = inspect(&grant.access_token);
        if shape == TokenShape::Malformed {
            return Err(ErrorCode::MalformedToken.into());
        }

        let profile = match grant.user {
            Some(user) => user,
            None => self
                .client
                .check(&grant.access_token)
                .await
                .map_err(|e| AuthError::new(e.code(), display_message(&e, e.code())))?,
        };

        let expires_at = expiry_from(grant.expires_in_seconds, &shape);
        let creds = Credentials {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: Some(expires_at),
        };
        {
            let _session = self.session_lock.lock();
            self.end_scope();
            self.install_credentials(creds, Some(&profile));
            self.reset_deferred();

            let next =
                SessionStateBuilder::guest().with_profile(&profile).with_expiry(Some(expires_at)).build();
            self.publish(next);
            self.set_phase(Phase::Authenticated);
        }
        Ok(self.state())
    }

    // -- Logout --------------------------------------------------------------

    /// Sign out. The remote notification is best-effort; local credentials
    /// are always cleared and exactly one `LoggedOut` is emitted.
    pub async fn logout(&self) -> LogoutReport {
        let creds = self.credentials.read().clone();
        let remote_notified = match creds {
            Some(ref c) => {
                match self.client.logout(Some(&c.access_token), c.refresh_token.as_deref()).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(err = %e, "logout notification failed");
                        false
                    }
                }
            }
            None => false,
        };

        let store_error = {
            let _session = self.session_lock.lock();
            self.end_scope();
            self.stop_tasks();
            let store_error = self.clear_credentials().err().map(|e| e.to_string());
            self.publish(SessionState::guest());
            self.set_phase(Phase::Guest);
            self.emit(SessionEvent::LoggedOut);
            store_error
        };
        info!(remote_notified, "logged out");
        self.host.notify(Severity::Info, "Signed out.");
        LogoutReport { remote_notified, store_error }
    }

    // -- Restore & verify ----------------------------------------------------

    /// Load the stored session without contacting the identity service.
    ///
    /// The published state is seeded from the cached identity snapshot, if
    /// one survives; nothing is verified.
    pub fn resume_cached(&self) -> Arc<SessionState> {
        self.load_session();
        self.state()
    }

    fn load_session(&self) -> Option<(Credentials, Option<UserProfile>)> {
        let creds = match self.load_credentials() {
            Ok(Some(creds)) => creds,
            Ok(None) => {
                debug!("no stored session");
                return None;
            }
            Err(e) => {
                warn!(err = %e, "failed to read stored session");
                return None;
            }
        };
        if inspect(&creds.access_token) == TokenShape::Malformed {
            warn!("stored access token is malformed, discarding session");
            self.invalidate();
            return None;
        }

        *self.credentials.write() = Some(creds.clone());
        let cached = self.cached_profile();
        if let Some(ref profile) = cached {
            let seeded =
                SessionStateBuilder::guest().with_profile(profile).with_expiry(creds.expires_at).build();
            self.publish(seeded);
            self.set_phase(Phase::Authenticated);
        }
        Some((creds, cached))
    }

    /// Rebuild the session from stored credentials at process start and
    /// confirm it with the identity service.
    pub async fn restore(self: &Arc<Self>) -> Arc<SessionState> {
        let Some((creds, cached)) = self.load_session() else {
            return self.state();
        };

        if creds.lifecycle().is_expired() {
            match self.refresh(true).await {
                RefreshOutcome::Refreshed { .. } => {}
                RefreshOutcome::Recovered { .. } => {
                    self.start_monitor();
                    return self.state();
                }
                RefreshOutcome::NoRefreshToken => {
                    info!("stored session expired and cannot be refreshed");
                    self.invalidate();
                    return self.state();
                }
                other => {
                    debug!(?other, "could not refresh expired session");
                    return self.state();
                }
            }
        }

        match self.confirm_identity().await {
            Ok(profile) => self.adopt_profile(&profile),
            Err(RemoteError::Unauthorized(_)) => {
                info!("stored session rejected by identity service");
                self.invalidate();
            }
            Err(e) if cached.is_some() => {
                warn!(err = %e, "identity service unreachable, continuing with cached identity");
            }
            Err(e) => debug!(err = %e, "could not verify stored session"),
        }

        if self.state().authenticated() {
            self.start_monitor();
        }
        self.state()
    }

    /// Confirm the session with the identity service, refreshing first if
    /// the access token has expired.
    pub async fn verify(self: &Arc<Self>) -> Result<bool, AuthError> {
        if self.credentials.read().is_none() {
            return Ok(false);
        }
        if self.lifecycle().is_expired() && !self.refresh(true).await.is_success() {
            return Ok(false);
        }
        match self.confirm_identity().await {
            Ok(profile) => {
                self.adopt_profile(&profile);
                Ok(true)
            }
            Err(RemoteError::Unauthorized(_)) => Ok(false),
            Err(e) => Err(AuthError::new(e.code(), display_message(&e, e.code()))),
        }
    }

    /// `/auth/check`, retried once after a silent refresh if the token is refused.
    async fn confirm_identity(self: &Arc<Self>) -> Result<UserProfile, RemoteError> {
        let access = self.access_token().ok_or_else(|| RemoteError::Unauthorized("no access token".into()))?;
        match self.client.check(&access).await {
            Err(RemoteError::Unauthorized(msg)) if self.has_refresh_token() => {
                debug!("access token refused, refreshing before re-check");
                if !matches!(self.refresh(true).await, RefreshOutcome::Refreshed { .. }) {
                    return Err(RemoteError::Unauthorized(msg));
                }
                let access = self.access_token().ok_or(RemoteError::Unauthorized(msg))?;
                self.client.check(&access).await
            }
            other => other,
        }
    }

    /// Publish a verified identity on top of the current expiry.
    fn adopt_profile(&self, profile: &UserProfile) {
        self.persist_profile(profile);
        let next = SessionStateBuilder::from(&self.state())
            .with_profile(profile)
            .with_expiry(self.lifecycle().expires_at())
            .build();
        self.publish(next);
        self.set_phase(Phase::Authenticated);
    }

    // -- API key -------------------------------------------------------------

    /// API key provisioned for the signed-in user, cached after first fetch.
    pub async fn api_key(&self) -> Result<Option<String>, AuthError> {
        match self.store.get(keys::API_KEY) {
            Ok(Some(key)) => return Ok(Some(key)),
            Ok(None) => {}
            Err(e) => debug!(err = %e, "api key cache unavailable"),
        }
        let access = self.access_token().ok_or(AuthError::from(ErrorCode::SessionExpired))?;
        match self.client.api_key(&access).await {
            Ok(Some(key)) => {
                if let Err(e) = self.store.set(keys::API_KEY, &key) {
                    warn!(err = %e, "failed to cache api key");
                }
                Ok(Some(key))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::new(e.code(), display_message(&e, e.code()))),
        }
    }

    // -- Teardown ------------------------------------------------------------

    /// Stop the background loop, any scheduled retry and any refresh in
    /// flight. Nothing is written after this returns.
    pub fn dispose(&self) {
        {
            let _session = self.session_lock.lock();
            let mut flights = self.flights.lock();
            self.shutdown.cancel();
            flights.current = None;
        }
        self.stop_tasks();
        debug!("session manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn stop_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.monitor.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.deferred.take() {
            handle.abort();
        }
        drop(tasks);
        *self.deferred.lock() = DeferredRetry::default();
    }

    /// End the current session scope: a refresh in flight is abandoned and
    /// nothing it started may commit.
    fn end_scope(&self) {
        let mut flights = self.flights.lock();
        flights.scope.cancel();
        flights.scope = self.shutdown.child_token();
        flights.current = None;
    }

    /// Run `commit` unless the scope it was started under has ended.
    fn commit<T>(&self, scope: &CancellationToken, commit: impl FnOnce() -> T) -> Option<T> {
        let _session = self.session_lock.lock();
        if scope.is_cancelled() {
            return None;
        }
        Some(commit())
    }

    // -- Publication ---------------------------------------------------------

    /// Replace the published snapshot. Emits `StateChanged` only when at
    /// least one field differs. Returns whether anything changed.
    fn publish(&self, next: SessionState) -> bool {
        let _guard = self.publish_lock.lock();
        let current = Arc::clone(&self.state_tx.borrow());
        let changed = compare(&current, &next);
        if changed.is_empty() {
            return false;
        }
        self.state_tx.send_replace(Arc::new(next.clone()));
        let _ = self.event_tx.send(SessionEvent::StateChanged { state: next, changed });
        true
    }

    fn emit(&self, event: SessionEvent) {
        let _guard = self.publish_lock.lock();
        let _ = self.event_tx.send(event);
    }

    fn set_phase(&self, next: Phase) {
        let prev = std::mem::replace(&mut *self.phase.write(), next);
        if prev != next {
            debug!(from = %prev, to = %next, "phase");
        }
    }

    // -- Credentials ---------------------------------------------------------

    fn access_token(&self) -> Option<String> {
        self.credentials.read().as_ref().map(|c| c.access_token.clone())
    }

    /// Hold `creds` in memory and write them through the store.
    fn install_credentials(&self, creds: Credentials, profile: Option<&UserProfile>) {
        if let Err(e) = self.store.set(keys::ACCESS_TOKEN, &creds.access_token) {
            warn!(err = %e, "failed to persist access token");
        }
        let refresh = match creds.refresh_token {
            Some(ref token) => self.store.set(keys::REFRESH_TOKEN, token),
            None => self.store.delete(keys::REFRESH_TOKEN),
        };
        if let Err(e) = refresh {
            warn!(err = %e, "failed to persist refresh token");
        }
        if let Some(exp) = creds.expires_at {
            if let Err(e) = self.store.set(keys::TOKEN_EXPIRY, &exp.to_string()) {
                warn!(err = %e, "failed to persist token expiry");
            }
        }
        if let Some(profile) = profile {
            self.persist_profile(profile);
        }
        *self.credentials.write() = Some(creds);
    }

    fn persist_profile(&self, profile: &UserProfile) {
        let stored = serde_json::to_string(profile)
            .map_err(StoreError::from)
            .and_then(|json| self.store.set(keys::USER_DATA, &json));
        if let Err(e) = stored {
            warn!(err = %e, "failed to persist user snapshot");
        }
    }

    fn load_credentials(&self) -> Result<Option<Credentials>, StoreError> {
        let Some(access_token) = self.store.get(keys::ACCESS_TOKEN)? else {
            return Ok(None);
        };
        let refresh_token = self.store.get(keys::REFRESH_TOKEN)?;
        let expires_at = self.store.get(keys::TOKEN_EXPIRY)?.and_then(|v| v.trim().parse().ok());
        Ok(Some(Credentials { access_token, refresh_token, expires_at }))
    }

    /// Identity snapshot from the lower store tiers, if any survives.
    fn cached_profile(&self) -> Option<UserProfile> {
        let raw = match self.store.get(keys::USER_DATA) {
            Ok(raw) => raw?,
            Err(e) => {
                debug!(err = %e, "user snapshot unavailable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(err = %e, "discarding unreadable user snapshot");
                None
            }
        }
    }

    fn clear_credentials(&self) -> Result<(), StoreError> {
        *self.credentials.write() = None;
        let result = self.store.clear_all();
        if let Err(ref e) = result {
            warn!(err = %e, "failed to clear stored credentials");
        }
        result
    }

    /// Drop the session without notifying the service: clear credentials,
    /// publish guest, cancel pending retries.
    fn invalidate(&self) {
        let _session = self.session_lock.lock();
        self.end_scope();
        self.stop_tasks();
        let _ = self.clear_credentials();
        self.publish(SessionState::guest());
        self.set_phase(Phase::Guest);
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("phase", &self.phase())
            .field("state", &self.state())
            .field("api_url", &self.client.base_url())
            .finish_non_exhaustive()
    }
}

/// Absolute expiry for a freshly issued token: the service's lifetime if
/// given, else the token's own `exp` claim, else one day.
fn expiry_from(expires_in: Option<i64>, shape: &TokenShape) -> i64 {
    let now = epoch_secs();
    match (expires_in, shape) {
        (Some(secs), _) if secs > 0 => now.saturating_add(secs),
        (_, TokenShape::Structured { expires_at, .. }) => *expires_at,
        _ => now.saturating_add(DEFAULT_EXPIRES_IN_SECS),
    }
}

/// Message for the user: the server's wording when it gave one.
fn display_message(err: &RemoteError, code: ErrorCode) -> String {
    match err {
        RemoteError::Network(_) | RemoteError::Malformed(_) => code.default_message().to_owned(),
        other if other.message().is_empty() => code.default_message().to_owned(),
        other => other.message().to_owned(),
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
