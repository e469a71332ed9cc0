//! Authenticated encryption for credentials at rest.
//!
//! AES-256-GCM with a per-credential random 96-bit nonce, key derived from
//! the keystore master secret via PBKDF2-SHA256. The wire shape is
//! `nonce || ciphertext`, base64-encoded by the caller for persistence.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::VaultError;

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;
/// Derived key length (AES-256).
const KEY_LEN: usize = 32;
/// Salt length stored alongside the vault file.
pub const SALT_LEN: usize = 16;

/// Symmetric cipher bound to one derived vault key.
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    /// Derive the vault key from the master secret.
    ///
    /// PBKDF2 at six-figure iteration counts is CPU-bound; callers run this
    /// under `spawn_blocking`.
    pub fn derive(master: &SecretString, salt: &[u8], iterations: u32) -> Result<Self, VaultError> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(
            master.expose_secret().as_bytes(),
            salt,
            iterations,
            &mut key,
        );
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| VaultError::Crypto {
            name: "<key-derivation>".to_string(),
            reason: e.to_string(),
        })?;
        key.fill(0);
        Ok(Self { cipher })
    }

    /// Encrypt under a fresh random nonce. Returns `nonce || ciphertext`.
    pub fn encrypt(&self, name: &str, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| VaultError::Crypto {
                name: name.to_string(),
                reason: "encryption failed".to_string(),
            })?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext`. Authentication failure is a
    /// `CryptoError`; the caller quarantines the credential.
    pub fn decrypt(&self, name: &str, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() <= NONCE_LEN {
            return Err(VaultError::Crypto {
                name: name.to_string(),
                reason: "ciphertext too short".to_string(),
            });
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Crypto {
                name: name.to_string(),
                reason: "authentication failed".to_string(),
            })
    }
}

/// Generate a fresh random vault salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> VaultCipher {
        // Low iteration count to keep the test fast; production floor is
        // enforced in config resolution, not here.
        VaultCipher::derive(&SecretString::from("master".to_string()), b"0123456789abcdef", 1_000)
            .unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let c = cipher();
        let sealed = c.encrypt("db_pass", b"s3cret").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"s3cret".as_slice());
        let opened = c.decrypt("db_pass", &sealed).unwrap();
        assert_eq!(opened, b"s3cret");
    }

    #[test]
    fn nonces_are_unique_per_encryption() {
        let c = cipher();
        let a = c.encrypt("x", b"same").unwrap();
        let b = c.encrypt("x", b"same").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let c = cipher();
        let mut sealed = c.encrypt("x", b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            c.decrypt("x", &sealed).unwrap_err(),
            VaultError::Crypto { .. }
        ));
    }

    #[test]
    fn different_master_secrets_cannot_decrypt() {
        let a = cipher();
        let b = VaultCipher::derive(
            &SecretString::from("other".to_string()),
            b"0123456789abcdef",
            1_000,
        )
        .unwrap();
        let sealed = a.encrypt("x", b"payload").unwrap();
        assert!(b.decrypt("x", &sealed).is_err());
    }
}
