//! Bootstrap helpers for AI-Shell.
//!
//! Resolves the per-user state directory and layers env files before any
//! component starts. The state directory holds everything the shell persists:
//! the vault ciphertext, the vector-index snapshot, the query-history log,
//! and the config file. All of it is owner-only.
//!
//! Env priority: explicit env vars > `./.env` > `~/.ai-shell/.env`.

use std::path::{Path, PathBuf};

/// Directory name under the user's home.
const STATE_DIR_NAME: &str = ".ai-shell";

/// Per-user state directory: `~/.ai-shell`.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

/// Path to the shell-specific `.env` file: `~/.ai-shell/.env`.
pub fn env_path() -> PathBuf {
    state_dir().join(".env")
}

/// Default config file path, overridable via `AI_SHELL_CONFIG`.
pub fn config_path() -> PathBuf {
    std::env::var("AI_SHELL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join("config.toml"))
}

/// Load env vars from `~/.ai-shell/.env` in addition to the standard `.env`.
///
/// Call this **after** `dotenvy::dotenv()` so that the working-directory
/// `.env` takes priority. dotenvy never overwrites existing vars.
pub fn load_shell_env() {
    let path = env_path();
    if path.exists() {
        let _ = dotenvy::from_path(&path);
    }
}

/// Create the state directory (owner-only) if it does not exist yet.
pub fn ensure_state_dir() -> std::io::Result<PathBuf> {
    let dir = state_dir();
    ensure_private_dir(&dir)?;
    Ok(dir)
}

/// Create `dir` with owner-only permissions, tightening them if it exists.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    restrict_to_owner(dir)
}

/// Restrict a file or directory to its owner (0700 for dirs, 0600 for files).
#[cfg(unix)]
pub fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path)?;
    let mode = if meta.is_dir() { 0o700 } else { 0o600 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
pub fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write `content` to `path` and restrict it to the owner in one step.
pub fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    std::fs::write(path, content)?;
    restrict_to_owner(path)
}
