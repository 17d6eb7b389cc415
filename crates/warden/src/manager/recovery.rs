// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Phase, RefreshOutcome, SessionManager};
use crate::client::RemoteError;
use crate::error::ErrorCode;
use crate::event::SessionEvent;
use crate::state::SessionStateBuilder;
use crate::token::{inspect, TokenShape};

impl SessionManager {
    /// Keep the session alive after a refresh could not complete.
    ///
    /// One `/auth/check` with the current access token decides: success
    /// counts as a refresh, a refusal signs out, and any other failure falls
    /// back to the cached identity snapshot so a transient outage does not
    /// end a previously valid session.
    ///
    /// Returns `None` when the session ended under `scope` before the
    /// outcome could be applied.
    pub(super) async fn recover(&self, scope: &CancellationToken) -> Option<RefreshOutcome> {
        let access = self.commit(scope, || {
            let access = self.access_token();
            match access {
                None => {
                    info!("no access token to recover with, signing out");
                    self.invalidate();
                    Err(RefreshOutcome::SignedOut)
                }
                Some(access) if inspect(&access) == TokenShape::Malformed => {
                    warn!("access token is malformed, signing out");
                    self.invalidate();
                    Err(RefreshOutcome::Failed(ErrorCode::MalformedToken))
                }
                Some(access) => {
                    self.set_phase(Phase::Recovering);
                    Ok(access)
                }
            }
        })?;
        let access = match access {
            Ok(access) => access,
            Err(outcome) => return Some(outcome),
        };

        let checked = self.client.check(&access).await;
        self.commit(scope, || match checked {
            Ok(profile) => {
                self.adopt_profile(&profile);
                let expires_at = self.lifecycle().expires_at();
                self.emit(SessionEvent::TokenRefreshed { expires_at });
                info!(user_id = %profile.id, "session re-verified with identity service");
                RefreshOutcome::Recovered { verified: true }
            }
            Err(RemoteError::Unauthorized(_)) => {
                info!("access token refused during recovery, signing out");
                self.invalidate();
                RefreshOutcome::SignedOut
            }
            Err(e) => self.recover_from_cache(e),
        })
    }

    fn recover_from_cache(&self, err: RemoteError) -> RefreshOutcome {
        let Some(profile) = self.cached_profile() else {
            warn!(err = %err, "identity service unreachable and no cached identity");
            let fallback =
                if self.state().authenticated() { Phase::Authenticated } else { Phase::Guest };
            self.set_phase(fallback);
            return RefreshOutcome::Failed(err.code());
        };

        warn!(
            err = %err,
            user_id = %profile.id,
            "identity service unreachable, continuing with cached identity (availability over verification)"
        );
        let next = SessionStateBuilder::from(&self.state())
            .with_profile(&profile)
            .with_expiry(self.lifecycle().expires_at())
            .build();
        if !self.publish(next) {
            debug!("cached identity matches published state");
        }
        self.set_phase(Phase::Authenticated);
        RefreshOutcome::Recovered { verified: false }
    }
}
