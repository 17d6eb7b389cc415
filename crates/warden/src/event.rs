// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::ErrorCode;
use crate::state::{SessionState, StateField};

/// Notifications published by the session manager, in publication order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The published snapshot changed in at least one field.
    StateChanged { state: SessionState, changed: BTreeSet<StateField> },
    LoginSucceeded { user_id: Option<String> },
    LoginFailed { code: ErrorCode, message: String },
    /// New credentials are in place, or the current ones were re-verified.
    TokenRefreshed { expires_at: Option<i64> },
    /// A refresh attempt did not produce new credentials.
    RefreshFailed { code: ErrorCode, message: String },
    LoggedOut,
}
