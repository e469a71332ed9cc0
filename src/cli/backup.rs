//! Local backups of the persisted state (vault ciphertext, history,
//! vector snapshot, config). Cloud transport is out of scope; these are
//! plain per-timestamp directories with a checksum manifest.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bootstrap;
use crate::error::{Error, Result};

/// Files eligible for backup, relative to the state dir.
const BACKUP_FILES: &[&str] = &[
    "vault.json",
    "history.jsonl",
    "vector-index.json",
    "config.toml",
];

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    created_at: chrono::DateTime<Utc>,
    files: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    sha256: String,
    bytes: u64,
}

fn backups_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("backups")
}

fn digest_file(path: &Path) -> Result<(String, u64)> {
    let data = std::fs::read(path).map_err(Error::Io)?;
    let digest = Sha256::digest(&data);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok((hex, data.len() as u64))
}

/// Create a backup; returns its id.
pub fn create(state_dir: &Path) -> Result<String> {
    let id = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let target = backups_dir(state_dir).join(&id);
    bootstrap::ensure_private_dir(&target).map_err(Error::Io)?;

    let mut entries = Vec::new();
    for name in BACKUP_FILES {
        let source = state_dir.join(name);
        if !source.exists() {
            continue;
        }
        let destination = target.join(name);
        std::fs::copy(&source, &destination).map_err(Error::Io)?;
        bootstrap::restrict_to_owner(&destination).map_err(Error::Io)?;
        let (sha256, bytes) = digest_file(&destination)?;
        entries.push(ManifestEntry {
            name: (*name).to_string(),
            sha256,
            bytes,
        });
    }

    let manifest = Manifest {
        created_at: Utc::now(),
        files: entries,
    };
    let raw = serde_json::to_string_pretty(&manifest)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;
    bootstrap::write_private(&target.join("manifest.json"), raw.as_bytes()).map_err(Error::Io)?;
    Ok(id)
}

/// List backup ids, newest first.
pub fn list(state_dir: &Path) -> Result<Vec<String>> {
    let dir = backups_dir(state_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(&dir)
        .map_err(Error::Io)?
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort_by(|a, b| b.cmp(a));
    Ok(ids)
}

/// Verify a backup against its manifest. Returns the verified file names.
pub fn verify(state_dir: &Path, id: &str) -> Result<Vec<String>> {
    let target = backups_dir(state_dir).join(id);
    let manifest_raw = std::fs::read_to_string(target.join("manifest.json")).map_err(Error::Io)?;
    let manifest: Manifest = serde_json::from_str(&manifest_raw)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut verified = Vec::new();
    for entry in &manifest.files {
        let path = target.join(&entry.name);
        let (sha256, bytes) = digest_file(&path)?;
        if sha256 != entry.sha256 || bytes != entry.bytes {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("checksum mismatch for {} in backup {id}", entry.name),
            )));
        }
        verified.push(entry.name.clone());
    }
    Ok(verified)
}

/// Restore a backup over the current state. Verifies first.
pub fn restore(state_dir: &Path, id: &str) -> Result<Vec<String>> {
    let restored = verify(state_dir, id)?;
    let target = backups_dir(state_dir).join(id);
    for name in &restored {
        let source = target.join(name);
        let destination = state_dir.join(name);
        std::fs::copy(&source, &destination).map_err(Error::Io)?;
        bootstrap::restrict_to_owner(&destination).map_err(Error::Io)?;
    }
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_verify_restore_round_trip() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("vault.json"), b"{\"v\":1}").unwrap();
        std::fs::write(dir.path().join("history.jsonl"), b"{}\n").unwrap();

        let id = create(dir.path()).unwrap();
        assert_eq!(list(dir.path()).unwrap(), vec![id.clone()]);

        let verified = verify(dir.path(), &id).unwrap();
        assert_eq!(verified.len(), 2);

        // Damage the live state, then restore.
        std::fs::write(dir.path().join("vault.json"), b"garbage").unwrap();
        restore(dir.path(), &id).unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("vault.json")).unwrap(),
            b"{\"v\":1}"
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("vault.json"), b"original").unwrap();
        let id = create(dir.path()).unwrap();

        let backup_file = dir.path().join("backups").join(&id).join("vault.json");
        std::fs::write(&backup_file, b"tampered").unwrap();

        assert!(verify(dir.path(), &id).is_err());
    }

    #[test]
    fn list_is_empty_without_backups() {
        let dir = tempdir().unwrap();
        assert!(list(dir.path()).unwrap().is_empty());
    }
}
