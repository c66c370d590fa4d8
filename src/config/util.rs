//! Configuration utility functions.

use std::path::{Path, PathBuf};

/// Find config file by searching upward from `start`
///
/// Walks up parent directories until finding `config_name`.
/// Returns the absolute path to the config file if found
///
/// # Example
/// ```text
/// /home/user/app/src/bin/   ← start
/// /home/user/app/wasmdev.toml  ← found!
/// ```
pub fn find_config_file(config_name: &Path, start: &Path) -> Option<PathBuf> {
    if config_name.is_absolute() {
        return config_name.exists().then(|| config_name.to_path_buf());
    }

    let mut current = start;
    loop {
        let candidate = current.join(config_name);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Resolve a configured path against the project root, expanding `~`.
pub fn resolve_against(root: &Path, path: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let path = PathBuf::from(expanded);
    if path.is_relative() {
        root.join(path)
    } else {
        path
    }
}

/// Canonicalize when possible, otherwise make absolute against cwd.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

// ============================================================================
// tests
// ============================================================================
