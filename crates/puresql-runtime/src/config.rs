//! Runtime configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RuntimeError};
use crate::paths;
use crate::platform::ArtifactDescriptor;
use crate::{DEFAULT_MODEL, DEFAULT_PORT};

/// Configuration for the runtime manager. Immutable once built.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    host: String,
    port: u16,
    api_base_url: String,
    install_dir: PathBuf,
    binary_path: PathBuf,
    models_dir: PathBuf,
    default_models: Vec<String>,
    startup_timeout: Duration,
    poll_interval: Duration,
    probe_timeout: Duration,
    grace_period: Duration,
    prefer_external: bool,
    artifact_override: Option<ArtifactDescriptor>,
}

impl RuntimeConfig {
    /// Create a builder rooted at `install_dir`.
    ///
    /// Hosts wanting the default location pass [`paths::data_dir`].
    pub fn builder(install_dir: impl Into<PathBuf>) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new(install_dir.into())
    }

    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let install_dir = match std::env::var("PURESQL_HOME") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => paths::data_dir()?,
        };
        let mut builder = Self::builder(install_dir);

        if let Ok(host) = std::env::var("PURESQL_RUNTIME_HOST") {
            builder = builder.host(host);
        }

        if let Ok(port) = std::env::var("PURESQL_RUNTIME_PORT") {
            let port = port
                .parse()
                .map_err(|_| RuntimeError::InvalidConfig(format!("invalid port: {}", port)))?;
            builder = builder.port(port);
        }

        if let Ok(dir) = std::env::var("PURESQL_MODELS_DIR") {
            builder = builder.models_dir(dir);
        }

        if let Ok(models) = std::env::var("PURESQL_DEFAULT_MODELS") {
            builder = builder.default_models(
                models
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            );
        }

        if let Some(secs) = std::env::var("PURESQL_STARTUP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            builder = builder.startup_timeout(Duration::from_secs(secs));
        }

        if let Ok(v) = std::env::var("PURESQL_PREFER_EXTERNAL") {
            builder = builder.prefer_external(v == "1" || v.to_lowercase() == "true");
        }

        if let Ok(url) = std::env::var("PURESQL_RUNTIME_URL") {
            let artifact = if url.ends_with(".zip") {
                ArtifactDescriptor::zip_archive(url)
            } else {
                ArtifactDescriptor::executable(url)
            };
            builder = builder.artifact(artifact);
        }

        builder.build()
    }

    /// Interface the runtime binds to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port the runtime API listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL of the runtime HTTP API, without trailing slash.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// Directory holding the runtime binary and scratch downloads.
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Final location of the runtime executable.
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Model storage handed to the runtime through `OLLAMA_MODELS`.
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Models pulled in the background once the runtime is healthy.
    pub fn default_models(&self) -> &[String] {
        &self.default_models
    }

    /// Upper bound on waiting for a launched runtime to become healthy.
    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Delay between health probes while starting.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Timeout of a single health request.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Time allowed for a graceful exit before the runtime is killed.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Adopt an already-running runtime instead of spawning one.
    pub fn prefer_external(&self) -> bool {
        self.prefer_external
    }

    /// Artifact replacing the platform table entry, if any.
    pub fn artifact_override(&self) -> Option<&ArtifactDescriptor> {
        self.artifact_override.as_ref()
    }

    /// Environment variables passed to the runtime process.
    pub fn child_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "OLLAMA_MODELS".to_string(),
                self.models_dir.display().to_string(),
            ),
            (
                "OLLAMA_HOST".to_string(),
                format!("{}:{}", self.host, self.port),
            ),
        ]
    }
}

/// Builder for runtime configuration.
#[derive(Debug)]
pub struct RuntimeConfigBuilder {
    host: String,
    port: u16,
    install_dir: PathBuf,
    binary_path: Option<PathBuf>,
    models_dir: Option<PathBuf>,
    default_models: Vec<String>,
    startup_timeout: Duration,
    poll_interval: Duration,
    probe_timeout: Duration,
    grace_period: Duration,
    prefer_external: bool,
    artifact_override: Option<ArtifactDescriptor>,
}

impl RuntimeConfigBuilder {
    fn new(install_dir: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            install_dir,
            binary_path: None,
            models_dir: None,
            default_models: vec![DEFAULT_MODEL.to_string()],
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            grace_period: Duration::from_secs(10),
            prefer_external: true,
            artifact_override: None,
        }
    }

    /// Interface to bind, `127.0.0.1` by default.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// API port, must be non-zero.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the binary location inside the install dir.
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = Some(path.into());
        self
    }

    /// Override the model storage directory.
    pub fn models_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.models_dir = Some(path.into());
        self
    }

    /// Models to preload after start. Empty disables preloading.
    pub fn default_models(mut self, models: Vec<String>) -> Self {
        self.default_models = models;
        self
    }

    /// Set the startup timeout.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the health polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-probe timeout.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the graceful shutdown period.
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Adopt a runtime already answering on the port instead of spawning one.
    pub fn prefer_external(mut self, prefer: bool) -> Self {
        self.prefer_external = prefer;
        self
    }

    /// Download `artifact` instead of the platform table entry.
    pub fn artifact(mut self, artifact: ArtifactDescriptor) -> Self {
        self.artifact_override = Some(artifact);
        self
    }

    pub fn build(self) -> Result<RuntimeConfig> {
        if self.port == 0 {
            return Err(RuntimeError::InvalidConfig("port must be non-zero".into()));
        }
        if self.startup_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "startup timeout and poll interval must be non-zero".into(),
            ));
        }
        if self.poll_interval >= self.startup_timeout {
            return Err(RuntimeError::InvalidConfig(
                "poll interval must be shorter than the startup timeout".into(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig("probe timeout must be non-zero".into()));
        }

        let binary_path = self
            .binary_path
            .unwrap_or_else(|| paths::runtime_binary_path(&self.install_dir));
        let models_dir = self
            .models_dir
            .unwrap_or_else(|| paths::models_dir(&self.install_dir));

        Ok(RuntimeConfig {
            api_base_url: format!("http://{}:{}", self.host, self.port),
            host: self.host,
            port: self.port,
            install_dir: self.install_dir,
            binary_path,
            models_dir,
            default_models: self.default_models,
            startup_timeout: self.startup_timeout,
            poll_interval: self.poll_interval,
            probe_timeout: self.probe_timeout,
            grace_period: self.grace_period,
            prefer_external: self.prefer_external,
            artifact_override: self.artifact_override,
        })
    }
}
