// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Immutable authorization snapshots and the builder that produces them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::epoch_millis;

/// Authorization role assigned by the identity service.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Guest,
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Map the service's loosely formatted role string onto a role.
    ///
    /// Case, underscores, hyphens and spaces are ignored, so `SUPER_ADMIN`,
    /// `superAdmin` and `super admin` all map to [`Role::SuperAdmin`].
    /// Anything unrecognised is a guest.
    pub fn from_server(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "user" => Self::User,
            "admin" | "administrator" => Self::Admin,
            "superadmin" | "superadministrator" => Self::SuperAdmin,
            _ => Self::Guest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    /// Admin-level roles bypass the feature table entirely.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal identity returned by the service and cached under `userData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Top-level fields of [`SessionState`] reported by [`compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Authenticated,
    UserId,
    Username,
    Role,
    Permissions,
    ExpiresAt,
}

/// Immutable snapshot of the current authorization.
///
/// `authenticated` alone does not mean the session is usable right now; the
/// expiry must be checked through [`crate::token::TokenLifecycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    authenticated: bool,
    user_id: Option<String>,
    username: Option<String>,
    role: Role,
    permissions: BTreeSet<String>,
    expires_at: Option<i64>,
    observed_at: i64,
}

impl SessionState {
    /// The unauthenticated default.
    pub fn guest() -> Self {
        SessionStateBuilder::guest().build()
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Expiry of the access token, unix seconds.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    /// Construction time, unix milliseconds.
    pub fn observed_at(&self) -> i64 {
        self.observed_at
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::guest()
    }
}

/// Chained builder for successor snapshots.
#[derive(Debug, Clone)]
pub struct SessionStateBuilder {
    authenticated: bool,
    user_id: Option<String>,
    username: Option<String>,
    role: Role,
    permissions: BTreeSet<String>,
    expires_at: Option<i64>,
}

impl SessionStateBuilder {
    /// Start from all defaults.
    pub fn guest() -> Self {
        Self {
            authenticated: false,
            user_id: None,
            username: None,
            role: Role::Guest,
            permissions: BTreeSet::new(),
            expires_at: None,
        }
    }

    /// Start from a copy of `prev` so only the changed fields need setting.
    pub fn from(prev: &SessionState) -> Self {
        Self {
            authenticated: prev.authenticated,
            user_id: prev.user_id.clone(),
            username: prev.username.clone(),
            role: prev.role,
            permissions: prev.permissions.clone(),
            expires_at: prev.expires_at,
        }
    }

    #[must_use]
    pub fn with_authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>, username: Option<String>) -> Self {
        self.user_id = user_id;
        self.username = username;
        self
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: Option<i64>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Apply an authenticated identity from the service in one step.
    #[must_use]
    pub fn with_profile(self, profile: &UserProfile) -> Self {
        self.with_authenticated(true)
            .with_user(Some(profile.id.clone()), profile.name.clone())
            .with_role(Role::from_server(&profile.role))
            .with_permissions(profile.permissions.iter().cloned())
    }

    pub fn build(self) -> SessionState {
        // An unauthenticated snapshot never carries a role or permissions.
        let (role, permissions) = if self.authenticated {
            (self.role, self.permissions)
        } else {
            (Role::Guest, BTreeSet::new())
        };
        SessionState {
            authenticated: self.authenticated,
            user_id: self.user_id,
            username: self.username,
            role,
            permissions,
            expires_at: self.expires_at,
            observed_at: epoch_millis(),
        }
    }
}

/// Report which top-level fields differ between two snapshots.
///
/// `observed_at` is ignored: it changes on every build and carries no
/// authorization meaning.
pub fn compare(old: &SessionState, new: &SessionState) -> BTreeSet<StateField> {
    let mut changed = BTreeSet::new();
    if old.authenticated != new.authenticated {
        changed.insert(StateField::Authenticated);
    }
    if old.user_id != new.user_id {
        changed.insert(StateField::UserId);
    }
    if old.username != new.username {
        changed.insert(StateField::Username);
    }
    if old.role != new.role {
        changed.insert(StateField::Role);
    }
    if old.permissions != new.permissions {
        changed.insert(StateField::Permissions);
    }
    if old.expires_at != new.expires_at {
        changed.insert(StateField::ExpiresAt);
    }
    changed
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
