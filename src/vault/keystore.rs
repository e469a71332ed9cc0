//! Keystore backends supplying the vault's master secret.
//!
//! The vault never generates key material on its own: if the configured
//! entry cannot be found, opening the vault fails closed with
//! `KeystoreUnavailable`. Provisioning an entry is an explicit operator
//! action.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::bootstrap;
use crate::error::VaultError;

/// Source of the master secret the vault key is derived from.
pub trait Keystore: Send + Sync {
    /// Name of the keystore entry (from `AI_SHELL_VAULT_KEY` or config).
    fn entry_name(&self) -> &str;

    /// Load the master secret. `KeystoreUnavailable` if the entry is absent.
    fn load_master_secret(&self) -> Result<SecretString, VaultError>;
}

/// File-backed keystore: one owner-only file per entry under
/// `<state-dir>/keystore/`.
pub struct FileKeystore {
    dir: PathBuf,
    entry: String,
}

impl FileKeystore {
    pub fn new(state_dir: &std::path::Path, entry: impl Into<String>) -> Self {
        Self {
            dir: state_dir.join("keystore"),
            entry: entry.into(),
        }
    }

    fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }

    /// Write the entry. Explicit operator provisioning, not called at open.
    pub fn provision(&self, secret: &str) -> Result<(), VaultError> {
        bootstrap::write_private(&self.entry_path(), secret.as_bytes())
            .map_err(|e| VaultError::KeystoreUnavailable(e.to_string()))
    }

    pub fn exists(&self) -> bool {
        self.entry_path().exists()
    }
}

impl Keystore for FileKeystore {
    fn entry_name(&self) -> &str {
        &self.entry
    }

    fn load_master_secret(&self) -> Result<SecretString, VaultError> {
        let path = self.entry_path();
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            VaultError::KeystoreUnavailable(format!(
                "keystore entry '{}' not found at {}",
                self.entry,
                path.display()
            ))
        })?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(VaultError::KeystoreUnavailable(format!(
                "keystore entry '{}' is empty",
                self.entry
            )));
        }
        Ok(SecretString::from(trimmed.to_string()))
    }
}

/// Env-var keystore for headless runs: the entry name is the variable name.
pub struct EnvKeystore {
    entry: String,
}

impl EnvKeystore {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
        }
    }
}

impl Keystore for EnvKeystore {
    fn entry_name(&self) -> &str {
        &self.entry
    }

    fn load_master_secret(&self) -> Result<SecretString, VaultError> {
        match std::env::var(&self.entry) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(SecretString::from(value.trim().to_string()))
            }
            _ => Err(VaultError::KeystoreUnavailable(format!(
                "environment entry '{}' is not set",
                self.entry
            ))),
        }
    }
}
