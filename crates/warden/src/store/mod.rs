// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tiered credential persistence.
//!
//! Reads prefer the durable secret store, then the secondary backup, then the
//! process-lifetime memory cache. Only the token expiry and the minimal user
//! snapshot are mirrored into the lower tiers; raw tokens stay in the durable
//! store. A value recovered from a lower tier is written back up so the
//! durable store heals after a restart that lost it.

pub mod backup;
pub mod keychain;
pub mod memory;

use tracing::{debug, warn};

pub use self::backup::FileBackup;
pub use self::keychain::KeyringBackend;
pub use self::memory::MemoryBackend;

/// Well-known keys.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    /// Unix seconds, string-encoded.
    pub const TOKEN_EXPIRY: &str = "tokenExpiry";
    /// Minimal JSON identity snapshot.
    pub const USER_DATA: &str = "userData";
    /// Provisioned downstream API key.
    pub const API_KEY: &str = "apiKey";

    pub const ALL: &[&str] = &[ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRY, USER_DATA, API_KEY];

    /// Keys safe to keep outside the durable secret store.
    pub const MIRRORED: &[&str] = &[TOKEN_EXPIRY, USER_DATA];

    pub fn is_mirrored(key: &str) -> bool {
        MIRRORED.contains(&key)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{backend} unavailable: {message}")]
    Unavailable { backend: &'static str, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One storage tier.
pub trait SecretBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Durable store with a secondary backup and an in-memory cache.
pub struct CredentialStore {
    durable: Box<dyn SecretBackend>,
    backup: Box<dyn SecretBackend>,
    memory: MemoryBackend,
}

impl CredentialStore {
    pub fn new(durable: Box<dyn SecretBackend>, backup: Box<dyn SecretBackend>) -> Self {
        Self { durable, backup, memory: MemoryBackend::default() }
    }

    /// A store whose durable and backup tiers are both process-local.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::default()), Box::new(MemoryBackend::default()))
    }

    /// Write `value` under `key`.
    ///
    /// Mirrored keys succeed as long as any tier accepted the write; other
    /// keys fail if the durable store rejects them.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let durable = self.durable.set(key, value);
        if !keys::is_mirrored(key) {
            return durable;
        }

        if let Err(ref e) = durable {
            let backend = self.durable.name();
            warn!(key, backend, err = %e, "durable write failed, relying on backup");
        }
        let backup = self.backup.set(key, value);
        if let Err(ref e) = backup {
            warn!(key, backend = self.backup.name(), err = %e, "backup write failed");
        }
        self.memory.set(key, value)?;
        Ok(())
    }

    /// Read `key`, healing higher tiers from whichever tier still has it.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let durable_err = match self.durable.get(key) {
            Ok(Some(value)) => return Ok(Some(value)),
            Ok(None) => None,
            Err(e) => {
                warn!(key, backend = self.durable.name(), err = %e, "durable read failed");
                Some(e)
            }
        };

        if keys::is_mirrored(key) {
            match self.backup.get(key) {
                Ok(Some(value)) => {
                    debug!(key, "recovered value from backup tier");
                    self.heal(key, &value, &[&*self.durable]);
                    let _ = self.memory.set(key, &value);
                    return Ok(Some(value));
                }
                Ok(None) => {}
                Err(e) => warn!(key, backend = self.backup.name(), err = %e, "backup read failed"),
            }

            if let Ok(Some(value)) = self.memory.get(key) {
                debug!(key, "recovered value from memory tier");
                self.heal(key, &value, &[&*self.durable, &*self.backup]);
                return Ok(Some(value));
            }
        }

        match durable_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Remove `key` from every tier.
    ///
    /// Every tier is attempted; the first failure is returned. A value left
    /// behind in the backup would otherwise heal back on the next read.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let durable = self.durable.delete(key);
        let backup = if keys::is_mirrored(key) { self.backup.delete(key) } else { Ok(()) };
        if let Err(ref e) = backup {
            warn!(key, backend = self.backup.name(), err = %e, "backup delete failed");
        }
        self.memory.delete(key)?;
        durable.and(backup)
    }

    /// Remove every well-known key from every tier.
    ///
    /// Continues past failures and reports the first one.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        let mut first_err = None;
        for key in keys::ALL {
            if let Err(e) = self.delete(key) {
                warn!(key, err = %e, "failed to clear key");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn heal(&self, key: &str, value: &str, tiers: &[&dyn SecretBackend]) {
        for tier in tiers {
            if let Err(e) = tier.set(key, value) {
                debug!(key, backend = tier.name(), err = %e, "self-heal write failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
