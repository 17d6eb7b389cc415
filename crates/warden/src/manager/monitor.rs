// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic background validity check.

use std::sync::{Arc, Weak};

use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::{RefreshOutcome, SessionManager, SKIP_WINDOW_SECS};
use crate::token::epoch_secs;

/// What one background round did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nobody is signed in.
    Idle,
    /// Plenty of validity left; nothing checked.
    Skipped { remaining_secs: i64 },
    /// Checked and still valid beyond the refresh buffer.
    Valid,
    /// Checked, found due, and refreshed.
    Refreshed(RefreshOutcome),
}

impl SessionManager {
    /// Start the background check loop if it is not already running.
    pub fn start_monitor(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut tasks = self.tasks.lock();
        if tasks.monitor.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(self);
        let interval = self.config.check_interval();
        let shutdown = self.shutdown.clone();
        debug!(interval_secs = interval.as_secs(), "starting background check");
        tasks.monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; the session was just checked.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }
                if !tick(&weak).await {
                    break;
                }
            }
            debug!("background check stopped");
        }));
    }

    /// Whether the background loop is currently running.
    pub fn monitor_running(&self) -> bool {
        self.tasks.lock().monitor.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// One background round. Errors are contained here; nothing escapes to
    /// the loop.
    pub async fn check_once(self: &Arc<Self>) -> CheckOutcome {
        if !self.state().authenticated() && self.access_token().is_none() {
            return CheckOutcome::Idle;
        }

        let lifecycle = self.lifecycle();
        if let Some(remaining_secs) = lifecycle.remaining_seconds_at(epoch_secs()) {
            if remaining_secs > SKIP_WINDOW_SECS {
                debug!(remaining_secs, "token has ample validity, skipping check");
                return CheckOutcome::Skipped { remaining_secs };
            }
        }

        if lifecycle.is_valid(self.config.refresh_buffer_secs) {
            return CheckOutcome::Valid;
        }
        let outcome = self.refresh(true).await;
        debug!(?outcome, "background refresh finished");
        CheckOutcome::Refreshed(outcome)
    }
}

/// Returns false once the manager is gone.
async fn tick(weak: &Weak<SessionManager>) -> bool {
    let Some(manager) = weak.upgrade() else {
        return false;
    };
    manager.check_once().await;
    true
}
