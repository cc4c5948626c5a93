//! Path utilities for pureSQL data directories.

use std::path::{Path, PathBuf};

use crate::error::{Result, RuntimeError};

/// Get the pureSQL data directory (~/.pureSQL/).
pub fn data_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".pureSQL"))
        .ok_or(RuntimeError::NoHomeDir)
}

/// Default models directory inside an install directory.
pub fn models_dir(install_dir: &Path) -> PathBuf {
    install_dir.join("models")
}

/// Platform-specific filename of the runtime executable.
pub fn runtime_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ollama.exe"
    } else {
        "ollama"
    }
}

/// Get the path to the runtime binary inside an install directory.
pub fn runtime_binary_path(install_dir: &Path) -> PathBuf {
    install_dir.join(runtime_binary_name())
}

/// Ensure a directory exists, creating parents as needed.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| RuntimeError::fs(dir, e))
}
