// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden: credential and token-lifecycle management for an identity service.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod host;
pub mod manager;
pub mod policy;
pub mod state;
pub mod store;
pub mod terminal;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::config::SessionConfig;
pub use crate::error::{AuthError, ErrorCode};
pub use crate::event::SessionEvent;
pub use crate::facade::SessionFacade;
pub use crate::manager::{Phase, RefreshOutcome, SessionManager};
pub use crate::policy::{AccessDecision, AccessPolicy, Feature};
pub use crate::state::{Role, SessionState, SessionStateBuilder};
pub use crate::store::CredentialStore;

static CRYPTO_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
