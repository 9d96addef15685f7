//! `.env` discovery for uos-linker.
//!
//! File: `~/.uos-linker/.env` (standard dotenvy format), loaded after the
//! working directory's `./.env`.

use std::path::{Path, PathBuf};

/// Per-user state directory: `~/.uos-linker`.
pub fn uos_linker_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".uos-linker")
}

/// Path to the service's own `.env` file: `~/.uos-linker/.env`.
pub fn uos_linker_env_path() -> PathBuf {
    uos_linker_home().join(".env")
}

/// Load `./.env`, then `~/.uos-linker/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.uos-linker/.env`
///
/// Returns the files that were actually loaded.
pub fn load_env() -> Vec<PathBuf> {
    let mut loaded = Vec::new();
    if let Ok(path) = dotenvy::dotenv() {
        loaded.push(path);
    }
    let home_env = uos_linker_env_path();
    if load_env_file(&home_env) {
        loaded.push(home_env);
    }
    loaded
}

/// Load one `.env` file if it exists. A malformed file is reported on stderr
/// since logging is not initialised yet.
pub fn load_env_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Warning: failed to load {}: {}", path.display(), e);
            false
        }
    }
}
