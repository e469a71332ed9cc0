//! Encrypted credential vault with auto-redaction.
//!
//! Secrets are encrypted at rest (AES-256-GCM, per-credential nonce) under a
//! key derived from an OS keystore entry via PBKDF2-SHA256. Plaintext only
//! exists inside this module's decryption boundary. The redaction table
//! always holds the plaintext of every credential whose `auto_redact` flag is
//! set, so any text routed through [`Vault::auto_redact`] is safe to persist.
//!
//! Opening the vault fails closed when the keystore entry is missing; a key
//! is never generated silently.

mod crypto;
mod keystore;
mod redaction;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::bootstrap;
use crate::config::VaultConfig;
use crate::error::VaultError;

pub use self::crypto::VaultCipher;
pub use self::keystore::{EnvKeystore, FileKeystore, Keystore};
pub use self::redaction::RedactionTable;

/// Credential classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Standard,
    Database,
    UserDefined,
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Database => write!(f, "database"),
            Self::UserDefined => write!(f, "user-defined"),
        }
    }
}

/// Non-secret credential metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialMetadata {
    pub created: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub encrypted: bool,
}

/// One stored credential; `ciphertext` is base64(nonce || aes-gcm output).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCredential {
    id: Uuid,
    name: String,
    #[serde(rename = "type")]
    credential_type: CredentialType,
    ciphertext: String,
    metadata: CredentialMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schema: Option<serde_json::Value>,
    #[serde(default = "default_auto_redact")]
    auto_redact: bool,
}

fn default_auto_redact() -> bool {
    true
}

/// Listing entry: names and metadata only, never values.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialInfo {
    pub name: String,
    pub credential_type: CredentialType,
    pub created: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub quarantined: bool,
}

/// KDF parameters persisted with the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KdfParams {
    salt: String,
    iterations: u32,
}

/// On-disk vault layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultFile {
    version: u32,
    kdf: KdfParams,
    credentials: Vec<StoredCredential>,
}

const VAULT_FILE_VERSION: u32 = 1;

struct VaultState {
    credentials: HashMap<String, StoredCredential>,
    /// Names quarantined after a decryption failure this process lifetime.
    quarantined: std::collections::HashSet<String>,
    salt: Vec<u8>,
    iterations: u32,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

/// The credential vault.
pub struct Vault {
    path: PathBuf,
    cipher: VaultCipher,
    state: RwLock<VaultState>,
    redaction: RwLock<Arc<RedactionTable>>,
}

impl Vault {
    /// Open (or initialise) the vault at the configured path.
    ///
    /// Fails closed with `KeystoreUnavailable` when the keystore entry is
    /// absent. Key derivation runs on a blocking thread.
    pub async fn open(config: &VaultConfig, keystore: &dyn Keystore) -> Result<Self, VaultError> {
        let master = keystore.load_master_secret()?;

        let (salt, iterations, stored) = if config.vault_path.exists() {
            let raw = std::fs::read_to_string(&config.vault_path)
                .map_err(|e| VaultError::Persistence(e.to_string()))?;
            let file: VaultFile = serde_json::from_str(&raw)
                .map_err(|e| VaultError::Persistence(format!("corrupt vault file: {e}")))?;
            let salt = BASE64
                .decode(&file.kdf.salt)
                .map_err(|e| VaultError::Persistence(format!("corrupt vault salt: {e}")))?;
            (salt, file.kdf.iterations, file.credentials)
        } else {
            (
                crypto::generate_salt().to_vec(),
                config.kdf_iterations,
                Vec::new(),
            )
        };

        let derive_salt = salt.clone();
        let cipher = tokio::task::spawn_blocking(move || {
            VaultCipher::derive(&master, &derive_salt, iterations)
        })
        .await
        .map_err(|e| VaultError::Persistence(e.to_string()))??;

        let vault = Self {
            path: config.vault_path.clone(),
            cipher,
            state: RwLock::new(VaultState {
                credentials: stored
                    .into_iter()
                    .map(|c| (c.name.clone(), c))
                    .collect(),
                quarantined: Default::default(),
                salt,
                iterations,
            }),
            redaction: RwLock::new(Arc::new(RedactionTable::empty())),
        };
        // Verify the derived key against existing ciphertext and build the
        // initial redaction table; undecryptable credentials are quarantined.
        vault.rebuild_redaction_table();
        if !config.vault_path.exists() {
            vault.persist()?;
        }
        Ok(vault)
    }

    /// Store a new credential. `DuplicateName` if `name` already exists.
    pub fn store(
        &self,
        name: &str,
        value: &str,
        credential_type: CredentialType,
        schema: Option<serde_json::Value>,
    ) -> Result<Uuid, VaultError> {
        if name.trim().is_empty() {
            return Err(VaultError::SchemaViolation {
                name: name.to_string(),
                reason: "credential name cannot be empty".to_string(),
            });
        }
        validate_value(name, value, credential_type, schema.as_ref())?;

        let sealed = self.cipher.encrypt(name, value.as_bytes())?;
        let credential = StoredCredential {
            id: Uuid::new_v4(),
            name: name.to_string(),
            credential_type,
            ciphertext: BASE64.encode(sealed),
            metadata: CredentialMetadata {
                created: Utc::now(),
                rotated_at: None,
                encrypted: true,
            },
            schema,
            auto_redact: true,
        };
        let id = credential.id;

        {
            let mut state = self.state.write().expect("vault state poisoned");
            if state.credentials.contains_key(name) {
                return Err(VaultError::DuplicateName(name.to_string()));
            }
            state.credentials.insert(name.to_string(), credential);
        }
        self.persist()?;
        self.rebuild_redaction_table();
        Ok(id)
    }

    /// Retrieve a credential's plaintext, or a stable opaque token when
    /// `anonymise` is set. The token resolves back to plaintext only inside
    /// this process via [`Vault::resolve_token`].
    pub fn retrieve(&self, name: &str, anonymise: bool) -> Result<SecretString, VaultError> {
        if anonymise {
            let state = self.state.read().expect("vault state poisoned");
            if !state.credentials.contains_key(name) {
                return Err(VaultError::NotFound(name.to_string()));
            }
            return Ok(SecretString::from(vault_token(name)));
        }
        self.decrypt_by_name(name)
    }

    /// Delete a credential. `NotFound` on a missing name, with no side effects.
    pub fn delete(&self, name: &str) -> Result<(), VaultError> {
        {
            let mut state = self.state.write().expect("vault state poisoned");
            if state.credentials.remove(name).is_none() {
                return Err(VaultError::NotFound(name.to_string()));
            }
            state.quarantined.remove(name);
        }
        self.persist()?;
        self.rebuild_redaction_table();
        Ok(())
    }

    /// Re-encrypt under a fresh nonce and the same key. Preserves `id`.
    pub fn rotate(&self, name: &str) -> Result<(), VaultError> {
        let plaintext = self.decrypt_by_name(name)?;
        let sealed = self.cipher.encrypt(name, plaintext.expose_secret().as_bytes())?;
        {
            let mut state = self.state.write().expect("vault state poisoned");
            let credential = state
                .credentials
                .get_mut(name)
                .ok_or_else(|| VaultError::NotFound(name.to_string()))?;
            credential.ciphertext = BASE64.encode(sealed);
            credential.metadata.rotated_at = Some(Utc::now());
        }
        self.persist()?;
        self.rebuild_redaction_table();
        Ok(())
    }

    /// List names and metadata. Never returns values.
    pub fn list(&self) -> Vec<CredentialInfo> {
        let state = self.state.read().expect("vault state poisoned");
        let mut infos: Vec<CredentialInfo> = state
            .credentials
            .values()
            .map(|c| CredentialInfo {
                name: c.name.clone(),
                credential_type: c.credential_type,
                created: c.metadata.created,
                rotated_at: c.metadata.rotated_at,
                quarantined: state.quarantined.contains(&c.name),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Credential names, for completion sources.
    pub fn names(&self) -> Vec<String> {
        let state = self.state.read().expect("vault state poisoned");
        let mut names: Vec<String> = state.credentials.keys().cloned().collect();
        names.sort();
        names
    }

    /// Substitute every stored plaintext (whole-token matches only) with
    /// `***<name>***`. Reads a lock-free snapshot of the redaction table.
    pub fn auto_redact(&self, text: &str) -> String {
        self.redaction_snapshot().redact(text)
    }

    /// Current redaction table snapshot.
    pub fn redaction_snapshot(&self) -> Arc<RedactionTable> {
        self.redaction
            .read()
            .expect("redaction table poisoned")
            .clone()
    }

    /// Resolve a vault anonymisation token back to plaintext.
    pub fn resolve_token(&self, token: &str) -> Option<SecretString> {
        let name = {
            let state = self.state.read().expect("vault state poisoned");
            state
                .credentials
                .keys()
                .find(|name| vault_token(name) == token)
                .cloned()
        }?;
        self.decrypt_by_name(&name).ok()
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("vault state poisoned")
            .credentials
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decrypt_by_name(&self, name: &str) -> Result<SecretString, VaultError> {
        let (ciphertext, quarantined) = {
            let state = self.state.read().expect("vault state poisoned");
            let credential = state
                .credentials
                .get(name)
                .ok_or_else(|| VaultError::NotFound(name.to_string()))?;
            (
                credential.ciphertext.clone(),
                state.quarantined.contains(name),
            )
        };
        if quarantined {
            return Err(VaultError::Quarantined(name.to_string()));
        }
        let sealed = BASE64.decode(&ciphertext).map_err(|e| VaultError::Crypto {
            name: name.to_string(),
            reason: format!("corrupt base64: {e}"),
        })?;
        match self.cipher.decrypt(name, &sealed) {
            Ok(plain) => String::from_utf8(plain)
                .map(SecretString::from)
                .map_err(|_| VaultError::Crypto {
                    name: name.to_string(),
                    reason: "plaintext is not valid UTF-8".to_string(),
                }),
            Err(err) => {
                // Quarantine, never delete: the ciphertext stays on disk for
                // operator recovery, and the redaction table drops the entry.
                self.quarantine(name);
                Err(err)
            }
        }
    }

    fn quarantine(&self, name: &str) {
        {
            let mut state = self.state.write().expect("vault state poisoned");
            state.quarantined.insert(name.to_string());
        }
        self.rebuild_redaction_table();
        tracing::warn!(credential = %name, "credential quarantined after decryption failure");
    }

    /// Rebuild the redaction snapshot from every decryptable, auto-redact
    /// credential. Failures quarantine the entry rather than aborting.
    fn rebuild_redaction_table(&self) {
        let candidates: Vec<(String, String)> = {
            let state = self.state.read().expect("vault state poisoned");
            state
                .credentials
                .values()
                .filter(|c| c.auto_redact && !state.quarantined.contains(&c.name))
                .map(|c| (c.name.clone(), c.ciphertext.clone()))
                .collect()
        };

        let mut pairs = Vec::with_capacity(candidates.len());
        let mut newly_quarantined = Vec::new();
        for (name, ciphertext) in candidates {
            let sealed = match BASE64.decode(&ciphertext) {
                Ok(bytes) => bytes,
                Err(_) => {
                    newly_quarantined.push(name);
                    continue;
                }
            };
            match self.cipher.decrypt(&name, &sealed) {
                Ok(plain) => match String::from_utf8(plain) {
                    Ok(text) => pairs.push((text, name)),
                    Err(_) => newly_quarantined.push(name),
                },
                Err(_) => newly_quarantined.push(name),
            }
        }

        if !newly_quarantined.is_empty() {
            let mut state = self.state.write().expect("vault state poisoned");
            for name in &newly_quarantined {
                state.quarantined.insert(name.clone());
                tracing::warn!(credential = %name, "credential quarantined during redaction rebuild");
            }
        }

        let table = Arc::new(RedactionTable::new(pairs));
        *self.redaction.write().expect("redaction table poisoned") = table;
    }

    fn persist(&self) -> Result<(), VaultError> {
        let file = {
            let state = self.state.read().expect("vault state poisoned");
            let mut credentials: Vec<StoredCredential> =
                state.credentials.values().cloned().collect();
            credentials.sort_by(|a, b| a.name.cmp(&b.name));
            VaultFile {
                version: VAULT_FILE_VERSION,
                kdf: KdfParams {
                    salt: BASE64.encode(&state.salt),
                    iterations: state.iterations,
                },
                credentials,
            }
        };
        let raw = serde_json::to_string_pretty(&file)
            .map_err(|e| VaultError::Persistence(e.to_string()))?;
        bootstrap::write_private(&self.path, raw.as_bytes())
            .map_err(|e| VaultError::Persistence(e.to_string()))
    }
}

/// Stable opaque token for a credential name.
fn vault_token(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut short = String::with_capacity(16);
    for byte in &digest[..8] {
        short.push_str(&format!("{byte:02x}"));
    }
    format!("<VAULT_{short}>")
}

fn validate_value(
    name: &str,
    value: &str,
    credential_type: CredentialType,
    schema: Option<&serde_json::Value>,
) -> Result<(), VaultError> {
    match credential_type {
        CredentialType::Standard => Ok(()),
        CredentialType::Database => {
            let parsed: serde_json::Value =
                serde_json::from_str(value).map_err(|e| VaultError::SchemaViolation {
                    name: name.to_string(),
                    reason: format!("database credential must be JSON: {e}"),
                })?;
            let obj = parsed.as_object().ok_or_else(|| VaultError::SchemaViolation {
                name: name.to_string(),
                reason: "database credential must be a JSON object".to_string(),
            })?;
            for key in ["host", "port", "username", "password"] {
                if !obj.contains_key(key) {
                    return Err(VaultError::SchemaViolation {
                        name: name.to_string(),
                        reason: format!("missing required key '{key}'"),
                    });
                }
            }
            Ok(())
        }
        CredentialType::UserDefined => {
            let Some(schema) = schema else {
                return Ok(());
            };
            let parsed: serde_json::Value =
                serde_json::from_str(value).map_err(|e| VaultError::SchemaViolation {
                    name: name.to_string(),
                    reason: format!("user-defined credential must be JSON: {e}"),
                })?;
            validate_schema_subset(name, &parsed, schema)
        }
    }
}

/// Minimal schema subset: `{"required": [..], "types": {"field": "string"|"number"|"bool"}}`.
fn validate_schema_subset(
    name: &str,
    value: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), VaultError> {
    let obj = value.as_object().ok_or_else(|| VaultError::SchemaViolation {
        name: name.to_string(),
        reason: "value must be a JSON object".to_string(),
    })?;

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(VaultError::SchemaViolation {
                    name: name.to_string(),
                    reason: format!("missing required key '{key}'"),
                });
            }
        }
    }

    if let Some(types) = schema.get("types").and_then(|t| t.as_object()) {
        for (key, expected) in types {
            let Some(actual) = obj.get(key) else { continue };
            let ok = match expected.as_str() {
                Some("string") => actual.is_string(),
                Some("number") => actual.is_number(),
                Some("bool") => actual.is_boolean(),
                _ => true,
            };
            if !ok {
                return Err(VaultError::SchemaViolation {
                    name: name.to_string(),
                    reason: format!("key '{key}' has the wrong type"),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open_vault(dir: &std::path::Path) -> Vault {
        let keystore = FileKeystore::new(dir, "master");
        keystore.provision("test-master-secret").unwrap();
        let config = VaultConfig {
            kdf_iterations: 100_000,
            keystore_entry: "master".to_string(),
            vault_path: dir.join("vault.json"),
        };
        Vault::open(&config, &keystore).await.unwrap()
    }

    #[tokio::test]
    async fn open_fails_closed_without_keystore_entry() {
        let dir = tempdir().unwrap();
        let keystore = FileKeystore::new(dir.path(), "missing");
        let config = VaultConfig {
            kdf_iterations: 100_000,
            keystore_entry: "missing".to_string(),
            vault_path: dir.path().join("vault.json"),
        };
        let err = Vault::open(&config, &keystore).await.unwrap_err();
        assert!(matches!(err, VaultError::KeystoreUnavailable(_)));
        assert!(!config.vault_path.exists(), "no vault file may be created");
    }

    #[tokio::test]
    async fn store_retrieve_round_trip() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;

        vault
            .store("api_key", "sk-something", CredentialType::Standard, None)
            .unwrap();
        let value = vault.retrieve("api_key", false).unwrap();
        assert_eq!(value.expose_secret(), "sk-something");
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("x", "one", CredentialType::Standard, None)
            .unwrap();
        let err = vault
            .store("x", "two", CredentialType::Standard, None)
            .unwrap_err();
        assert!(matches!(err, VaultError::DuplicateName(_)));
        assert_eq!(vault.retrieve("x", false).unwrap().expose_secret(), "one");
    }

    #[tokio::test]
    async fn delete_missing_is_not_found_without_side_effects() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("keep", "v", CredentialType::Standard, None)
            .unwrap();
        assert!(matches!(
            vault.delete("absent").unwrap_err(),
            VaultError::NotFound(_)
        ));
        assert_eq!(vault.len(), 1);
    }

    #[tokio::test]
    async fn rotate_preserves_id_and_value_under_fresh_nonce() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("db", "pass", CredentialType::Standard, None)
            .unwrap();

        let before = {
            let state = vault.state.read().unwrap();
            let c = state.credentials.get("db").unwrap().clone();
            (c.id, c.ciphertext)
        };
        vault.rotate("db").unwrap();
        let state = vault.state.read().unwrap();
        let after = state.credentials.get("db").unwrap();
        assert_eq!(after.id, before.0);
        assert_ne!(after.ciphertext, before.1);
        assert!(after.metadata.rotated_at.is_some());
        drop(state);
        assert_eq!(vault.retrieve("db", false).unwrap().expose_secret(), "pass");
    }

    #[tokio::test]
    async fn auto_redact_replaces_whole_tokens_only() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("secret", "password", CredentialType::Standard, None)
            .unwrap();

        assert_eq!(
            vault.auto_redact("My password123 is different"),
            "My password123 is different"
        );
        assert_eq!(vault.auto_redact("the password leaked"), "the ***secret*** leaked");
    }

    #[tokio::test]
    async fn redaction_table_tracks_store_and_delete() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("a", "alpha-secret", CredentialType::Standard, None)
            .unwrap();
        assert_eq!(vault.auto_redact("use alpha-secret now"), "use ***a*** now");

        vault.delete("a").unwrap();
        assert_eq!(vault.auto_redact("use alpha-secret now"), "use alpha-secret now");
    }

    #[tokio::test]
    async fn anonymised_retrieve_returns_stable_resolvable_token() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault
            .store("pg", "hunter2", CredentialType::Standard, None)
            .unwrap();

        let token1 = vault.retrieve("pg", true).unwrap();
        let token2 = vault.retrieve("pg", true).unwrap();
        assert_eq!(token1.expose_secret(), token2.expose_secret());
        assert!(token1.expose_secret().starts_with("<VAULT_"));

        let resolved = vault.resolve_token(token1.expose_secret()).unwrap();
        assert_eq!(resolved.expose_secret(), "hunter2");
    }

    #[tokio::test]
    async fn database_credentials_validate_shape() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        let err = vault
            .store("db", r#"{"host":"h"}"#, CredentialType::Database, None)
            .unwrap_err();
        assert!(matches!(err, VaultError::SchemaViolation { .. }));

        vault
            .store(
                "db",
                r#"{"host":"h","port":5432,"username":"u","password":"p"}"#,
                CredentialType::Database,
                None,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn user_defined_schema_subset_is_enforced() {
        let dir = tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        let schema = serde_json::json!({
            "required": ["token"],
            "types": {"token": "string", "ttl": "number"}
        });

        let err = vault
            .store(
                "svc",
                r#"{"ttl": 60}"#,
                CredentialType::UserDefined,
                Some(schema.clone()),
            )
            .unwrap_err();
        assert!(matches!(err, VaultError::SchemaViolation { .. }));

        vault
            .store(
                "svc",
                r#"{"token": "abc", "ttl": 60}"#,
                CredentialType::UserDefined,
                Some(schema),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn vault_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let vault = open_vault(dir.path()).await;
            vault
                .store("persisted", "v4lue", CredentialType::Standard, None)
                .unwrap();
        }
        let vault = open_vault(dir.path()).await;
        assert_eq!(
            vault.retrieve("persisted", false).unwrap().expose_secret(),
            "v4lue"
        );
        // Redaction table is rebuilt from disk on open.
        assert_eq!(vault.auto_redact("v4lue"), "***persisted***");
    }

    #[tokio::test]
    async fn wrong_master_secret_quarantines_instead_of_deleting() {
        let dir = tempdir().unwrap();
        {
            let vault = open_vault(dir.path()).await;
            vault
                .store("broken", "value", CredentialType::Standard, None)
                .unwrap();
        }
        // Reopen with a different master secret.
        let keystore = FileKeystore::new(dir.path(), "master");
        keystore.provision("a-different-secret").unwrap();
        let config = VaultConfig {
            kdf_iterations: 100_000,
            keystore_entry: "master".to_string(),
            vault_path: dir.path().join("vault.json"),
        };
        let vault = Vault::open(&config, &keystore).await.unwrap();

        let err = vault.retrieve("broken", false).unwrap_err();
        assert!(matches!(
            err,
            VaultError::Crypto { .. } | VaultError::Quarantined(_)
        ));
        // Still listed, still on disk, excluded from redaction.
        assert_eq!(vault.len(), 1);
        assert!(vault.list()[0].quarantined);
        assert_eq!(vault.auto_redact("value"), "value");
    }
}
