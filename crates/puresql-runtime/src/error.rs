//! Error types for runtime lifecycle operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while provisioning, launching or stopping the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No download is published for this OS/architecture pair.
    #[error("Unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    /// Network failure while fetching the runtime artifact.
    #[error("Failed to download runtime: {0}")]
    Download(String),

    /// The downloaded archive could not be extracted or lacks the executable.
    #[error("Invalid runtime archive: {0}")]
    Archive(String),

    /// Downloaded artifact does not match its published digest.
    #[error("Runtime checksum mismatch. Expected: {expected}, got: {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Filesystem operation failed (permissions, space, missing path).
    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to start the runtime process.
    #[error("Failed to launch {}: {source}", binary.display())]
    LaunchFailed {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The runtime process exited before it became healthy.
    #[error("Runtime process exited prematurely: {0}")]
    ExitedPrematurely(String),

    /// The runtime never answered its health endpoint in time.
    #[error("Timeout after {0:?} waiting for runtime to become healthy")]
    StartTimeout(Duration),

    /// Interrupt signal could not be delivered to the runtime process.
    #[error("Failed to signal runtime process: {0}")]
    Signal(#[source] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime returned an error response.
    #[error("API error: {0}")]
    Api(String),

    /// Runtime is not running or not reachable.
    #[error("Runtime not running at {0}")]
    ServerNotRunning(String),

    /// Home directory could not be determined for default paths.
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Configuration values are inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RuntimeError {
    /// Wrap an I/O error with the path it concerns.
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RuntimeError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
