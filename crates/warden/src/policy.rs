// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role-based feature access.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::state::{Role, SessionState};

/// Gated product features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Dashboard,
    ScopeManager,
    MockupGallery,
    DebugDetective,
    SimpleChat,
    ReferenceManager,
    EnvAssistant,
    UserManagement,
    SystemSettings,
}

impl Feature {
    pub const ALL: &'static [Feature] = &[
        Self::Dashboard,
        Self::ScopeManager,
        Self::MockupGallery,
        Self::DebugDetective,
        Self::SimpleChat,
        Self::ReferenceManager,
        Self::EnvAssistant,
        Self::UserManagement,
        Self::SystemSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::ScopeManager => "scope_manager",
            Self::MockupGallery => "mockup_gallery",
            Self::DebugDetective => "debug_detective",
            Self::SimpleChat => "simple_chat",
            Self::ReferenceManager => "reference_manager",
            Self::EnvAssistant => "env_assistant",
            Self::UserManagement => "user_management",
            Self::SystemSettings => "system_settings",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Dashboard => "Dashboard",
            Self::ScopeManager => "Scope Manager",
            Self::MockupGallery => "Mockup Gallery",
            Self::DebugDetective => "Debug Detective",
            Self::SimpleChat => "Chat",
            Self::ReferenceManager => "Reference Manager",
            Self::EnvAssistant => "Environment Assistant",
            Self::UserManagement => "User Management",
            Self::SystemSettings => "System Settings",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String =
            s.chars().filter(|c| !matches!(c, '_' | '-' | ' ')).flat_map(char::to_lowercase).collect();
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str().replace('_', "") == wanted)
            .ok_or_else(|| anyhow::anyhow!("unknown feature: {s}"))
    }
}

/// Features each non-admin role may use. Admin roles bypass this table.
fn granted(role: Role) -> &'static [Feature] {
    match role {
        Role::Guest => &[],
        Role::User => &[
            Feature::Dashboard,
            Feature::ScopeManager,
            Feature::MockupGallery,
            Feature::DebugDetective,
            Feature::SimpleChat,
            Feature::ReferenceManager,
            Feature::EnvAssistant,
        ],
        Role::Admin => &[Feature::UserManagement],
        Role::SuperAdmin => &[Feature::UserManagement, Feature::SystemSettings],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DecisionReason {
    Granted,
    RequiresLogin,
    InsufficientRole,
}

/// What the user can do about a denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Affordance {
    Login,
    ContactAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub display_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affordance: Option<Affordance>,
}

/// Effective role for access checks. Unauthenticated sessions are guests
/// whatever the snapshot says.
fn effective_role(state: &SessionState) -> Role {
    if state.authenticated() {
        state.role()
    } else {
        Role::Guest
    }
}

pub fn can_access(state: &SessionState, feature: Feature) -> bool {
    let role = effective_role(state);
    role.is_admin() || granted(role).contains(&feature)
}

pub fn explain(state: &SessionState, feature: Feature) -> AccessDecision {
    if can_access(state, feature) {
        return AccessDecision {
            allowed: true,
            reason: DecisionReason::Granted,
            display_message: format!("{} is available.", feature.display_name()),
            affordance: None,
        };
    }
    if !state.authenticated() {
        return AccessDecision {
            allowed: false,
            reason: DecisionReason::RequiresLogin,
            display_message: format!("Sign in to use {}.", feature.display_name()),
            affordance: Some(Affordance::Login),
        };
    }
    AccessDecision {
        allowed: false,
        reason: DecisionReason::InsufficientRole,
        display_message: format!(
            "{} is not available to the {} role. Contact an administrator for access.",
            feature.display_name(),
            effective_role(state),
        ),
        affordance: Some(Affordance::ContactAdmin),
    }
}

/// Access checks against the latest published session snapshot.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    state: watch::Receiver<Arc<SessionState>>,
}

impl AccessPolicy {
    pub fn new(state: watch::Receiver<Arc<SessionState>>) -> Self {
        Self { state }
    }

    fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&self.state.borrow())
    }

    pub fn can_access(&self, feature: Feature) -> bool {
        can_access(&self.snapshot(), feature)
    }

    pub fn explain_denial(&self, feature: Feature) -> AccessDecision {
        explain(&self.snapshot(), feature)
    }

    /// Every feature the current session may use.
    pub fn available_features(&self) -> Vec<Feature> {
        let state = self.snapshot();
        Feature::ALL.iter().copied().filter(|f| can_access(&state, *f)).collect()
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
