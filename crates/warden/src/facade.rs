// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only session view for collaborators that only need to attach
//! credentials or check who is signed in.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use crate::policy::{AccessDecision, AccessPolicy, Feature};
use crate::state::{Role, SessionState};
use crate::token::Credentials;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub role: Role,
}

struct Inner {
    state: watch::Receiver<Arc<SessionState>>,
    credentials: Arc<RwLock<Option<Credentials>>>,
}

/// Cheap to clone; every clone handed out by one manager shares the same
/// instance (see [`SessionFacade::same_as`]).
#[derive(Clone)]
pub struct SessionFacade {
    inner: Arc<Inner>,
}

impl SessionFacade {
    pub(crate) fn new(
        state: watch::Receiver<Arc<SessionState>>,
        credentials: Arc<RwLock<Option<Credentials>>>,
    ) -> Self {
        Self { inner: Arc::new(Inner { state, credentials }) }
    }

    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.inner.state.borrow())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().authenticated()
    }

    pub fn current_user(&self) -> Option<CurrentUser> {
        let state = self.state();
        if !state.authenticated() {
            return None;
        }
        Some(CurrentUser {
            id: state.user_id().map(str::to_owned),
            name: state.username().map(str::to_owned),
            role: state.role(),
        })
    }

    /// Current access token, only while signed in.
    pub fn bearer_token(&self) -> Option<String> {
        if !self.is_authenticated() {
            return None;
        }
        self.inner.credentials.read().as_ref().map(|c| c.access_token.clone())
    }

    /// `{"Authorization": "Bearer <token>"}`, or `None` when signed out.
    pub fn auth_header(&self) -> Option<HashMap<String, String>> {
        let token = self.bearer_token()?;
        Some(HashMap::from([("Authorization".to_owned(), format!("Bearer {token}"))]))
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.inner.state.clone())
    }

    pub fn can_access(&self, feature: Feature) -> bool {
        crate::policy::can_access(&self.state(), feature)
    }

    pub fn explain_denial(&self, feature: Feature) -> AccessDecision {
        crate::policy::explain(&self.state(), feature)
    }

    /// Whether two handles refer to the same facade instance.
    pub fn same_as(&self, other: &SessionFacade) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SessionFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFacade").field("state", &self.state()).finish_non_exhaustive()
    }
}
