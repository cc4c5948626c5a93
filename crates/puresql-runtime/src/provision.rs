//! Runtime binary provisioning: download, extraction and installation.
//!
//! A file present at the final binary path is always a complete,
//! executable runtime. Everything is staged in a scratch directory inside
//! the install directory and moved into place with a single rename once it
//! is fully written and has its permission bits.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::health::HealthCheck;
use crate::paths;
use crate::platform::{self, ArtifactDescriptor, ArtifactKind};
use crate::status::{LifecycleState, StatusRegistry};

const EXTRACT_PROGRESS: f64 = 75.0;
const INSTALL_PROGRESS: f64 = 92.0;
const INSTALLED_PROGRESS: f64 = 95.0;

/// Name prefix of per-install scratch directories inside the install dir.
const SCRATCH_PREFIX: &str = ".runtime-download-";

/// Outcome of [`BinaryProvisioner::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// An external runtime answers its health endpoint; nothing was installed.
    External,
    /// A binary from an earlier install was found.
    AlreadyInstalled,
    /// The binary was downloaded and installed by this call.
    Installed,
}

/// Ensures an executable runtime binary exists locally.
pub struct BinaryProvisioner {
    client: reqwest::Client,
    status: StatusRegistry,
}

impl BinaryProvisioner {
    /// Create a provisioner that reports progress into `status`.
    pub fn new(status: StatusRegistry) -> Self {
        Self {
            client: reqwest::Client::new(),
            status,
        }
    }

    /// Make sure the runtime binary is installed.
    ///
    /// On failure the status is moved to `error` and nothing is left at the
    /// final binary path.
    pub async fn ensure(&self, config: &RuntimeConfig, probe: &dyn HealthCheck) -> Result<Provisioned> {
        match self.ensure_inner(config, probe).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Runtime provisioning failed: {}", e);
                self.status.fail(failure_message(&e), e.to_string());
                Err(e)
            }
        }
    }

    async fn ensure_inner(
        &self,
        config: &RuntimeConfig,
        probe: &dyn HealthCheck,
    ) -> Result<Provisioned> {
        if config.prefer_external() && probe.check().await {
            info!(
                "External runtime detected at {}, skipping install",
                config.api_base_url()
            );
            return Ok(Provisioned::External);
        }

        self.status.transition(
            LifecycleState::Checking,
            "Checking for the runtime binary",
            0.0,
        );

        let binary = config.binary_path();
        if binary.is_file() {
            debug!("Runtime binary found at {:?}", binary);
            self.status.transition(
                LifecycleState::Installed,
                "Runtime binary found",
                INSTALLED_PROGRESS,
            );
            return Ok(Provisioned::AlreadyInstalled);
        }

        let artifact = match config.artifact_override() {
            Some(artifact) => artifact.clone(),
            None => platform::current()?,
        };
        let binary_name = binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_else(|| paths::runtime_binary_name())
            .to_string();

        let install_dir = binary.parent().unwrap_or(config.install_dir());
        paths::ensure_dir(install_dir)?;
        sweep_stale_scratch(install_dir, binary);

        // Same filesystem as the target so the final rename is atomic.
        // Removed on drop, whichever way this function exits.
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(install_dir)
            .map_err(|e| RuntimeError::fs(install_dir, e))?;

        let download_path = match artifact.kind {
            ArtifactKind::Executable => scratch.path().join(&binary_name),
            ArtifactKind::ZipArchive => scratch.path().join("runtime.zip"),
        };
        self.download(&artifact, &download_path).await?;

        let staged = match artifact.kind {
            ArtifactKind::Executable => download_path,
            ArtifactKind::ZipArchive => {
                self.status.transition(
                    LifecycleState::Extracting,
                    "Extracting the runtime archive",
                    EXTRACT_PROGRESS,
                );
                let extract_dir = scratch.path().join("extract");
                extract_zip(&download_path, &extract_dir).await?;
                locate_executable(&extract_dir, &binary_name)?
            }
        };

        self.status.transition(
            LifecycleState::Installing,
            "Installing the runtime binary",
            INSTALL_PROGRESS,
        );
        install_binary(&staged, binary, artifact.needs_exec_bit)?;
        drop(scratch);

        info!("Runtime installed at {:?}", binary);
        self.status.transition(
            LifecycleState::Installed,
            "Runtime installation complete",
            INSTALLED_PROGRESS,
        );
        Ok(Provisioned::Installed)
    }

    /// Stream the artifact to `dest`, reporting progress after every chunk.
    async fn download(&self, artifact: &ArtifactDescriptor, dest: &Path) -> Result<()> {
        info!("Downloading runtime from {}", artifact.url);
        self.status.update(|s| {
            s.transition(LifecycleState::Downloading, "Downloading runtime", 0.0);
            s.downloaded_bytes = 0;
            s.total_bytes = 0;
        });

        let response = self
            .client
            .get(&artifact.url)
            .header(ACCEPT, "application/octet-stream")
            .header(USER_AGENT, concat!("puresql-runtime/", env!("CARGO_PKG_VERSION")))
            .send()
            .await
            .map_err(|e| RuntimeError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RuntimeError::Download(format!(
                "HTTP {}: {}",
                response.status(),
                artifact.url
            )));
        }

        let total = response.content_length().unwrap_or(0);
        let cap = artifact.download_progress_cap();
        self.status.update(|s| s.total_bytes = total);

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| RuntimeError::fs(dest, e))?;
        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| RuntimeError::Download(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RuntimeError::fs(dest, e))?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            let progress = download_progress(downloaded, total, cap);
            self.status.update(|s| {
                s.state = LifecycleState::Downloading;
                s.downloaded_bytes = downloaded;
                s.progress_percent = progress;
                s.message = format!("Downloading runtime: {:.1}%", progress);
            });
        }

        file.flush().await.map_err(|e| RuntimeError::fs(dest, e))?;
        file.sync_all().await.map_err(|e| RuntimeError::fs(dest, e))?;
        drop(file);

        if let Some(expected) = &artifact.sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(RuntimeError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
            debug!("Checksum verified: {}", actual);
        }

        info!("Downloaded {} bytes from {}", downloaded, artifact.url);
        self.status.update(|s| {
            s.downloaded_bytes = downloaded;
            s.total_bytes = total.max(downloaded);
            s.progress_percent = cap;
            s.message = "Download complete".to_string();
        });
        Ok(())
    }
}

/// Download progress scaled into `[0, cap]`.
///
/// With an unknown total the value holds at zero until the download ends.
pub(crate) fn download_progress(downloaded: u64, total: u64, cap: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (downloaded as f64 / total as f64 * cap).min(cap)
}

fn failure_message(err: &RuntimeError) -> &'static str {
    match err {
        RuntimeError::UnsupportedPlatform { .. } => "Unsupported operating system",
        RuntimeError::Download(_) | RuntimeError::Http(_) => "Failed to download the runtime",
        RuntimeError::Archive(_) => "Failed to extract the runtime archive",
        RuntimeError::ChecksumMismatch { .. } => "Downloaded runtime failed verification",
        _ => "Failed to install the runtime binary",
    }
}

/// Remove scratch directories and `.partial` files left by an interrupted install.
///
/// Best effort: a leftover that cannot be removed is logged and skipped.
fn sweep_stale_scratch(install_dir: &Path, binary: &Path) {
    let Ok(entries) = std::fs::read_dir(install_dir) else {
        return;
    };
    let mut partial = binary.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(SCRATCH_PREFIX));
        let result = if is_scratch && path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else if path == partial {
            std::fs::remove_file(&path)
        } else {
            continue;
        };
        match result {
            Ok(()) => debug!("Removed stale install leftover {:?}", path),
            Err(e) => warn!("Could not remove stale install leftover {:?}: {}", path, e),
        }
    }
}

/// Extract a zip archive with the platform `unzip` tool.
async fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    paths::ensure_dir(dest)?;
    debug!("Extracting {:?} into {:?}", archive, dest);

    let output = Command::new("unzip")
        .arg("-o")
        .arg("-q")
        .arg(archive)
        .arg("-d")
        .arg(dest)
        .output()
        .await
        .map_err(|e| RuntimeError::Archive(format!("failed to run unzip: {}", e)))?;

    if !output.status.success() {
        return Err(RuntimeError::Archive(format!(
            "unzip exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

/// Find the runtime executable inside an extracted archive.
///
/// Looks for a file named exactly `name` (shallowest match wins), then
/// falls back to the application-bundle layout `*.app/Contents/{Resources,MacOS}`.
pub(crate) fn locate_executable(root: &Path, name: &str) -> Result<PathBuf> {
    let mut bundles = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let entries = std::fs::read_dir(&dir).map_err(|e| RuntimeError::fs(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| RuntimeError::fs(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| RuntimeError::fs(entry.path(), e))?;
            let path = entry.path();
            if file_type.is_file() && entry.file_name() == name {
                return Ok(path);
            }
            if file_type.is_dir() {
                if path.extension().is_some_and(|ext| ext == "app") {
                    bundles.push(path.clone());
                }
                queue.push_back(path);
            }
        }
    }

    for bundle in &bundles {
        if let Some(found) = bundle_executable(bundle, name) {
            debug!("Runtime executable found in bundle {:?}", bundle);
            return Ok(found);
        }
    }

    Err(RuntimeError::Archive(format!(
        "'{}' not found in extracted archive",
        name
    )))
}

/// Bundle fallback: a case-insensitive match in `Contents/Resources` or
/// `Contents/MacOS`.
fn bundle_executable(bundle: &Path, name: &str) -> Option<PathBuf> {
    ["Resources", "MacOS"]
        .iter()
        .map(|sub| bundle.join("Contents").join(sub))
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(|e| e.ok()))
        .find(|entry| {
            entry.file_type().is_ok_and(|t| t.is_file())
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .map(|entry| entry.path())
}

/// Move a fully written binary into place.
///
/// Permission bits are set before the rename so the final path never holds
/// a non-executable file. A cross-device rename falls back to copying into
/// a sibling `.partial` file that is then renamed.
pub(crate) fn install_binary(staged: &Path, target: &Path, needs_exec_bit: bool) -> Result<()> {
    if needs_exec_bit {
        set_executable(staged)?;
    }

    match std::fs::rename(staged, target) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Rename {:?} -> {:?} failed ({}), copying", staged, target, e);
            let mut partial = target.as_os_str().to_owned();
            partial.push(".partial");
            let partial = PathBuf::from(partial);

            let result = std::fs::copy(staged, &partial)
                .map_err(|e| RuntimeError::fs(&partial, e))
                .and_then(|_| {
                    if needs_exec_bit {
                        set_executable(&partial)
                    } else {
                        Ok(())
                    }
                })
                .and_then(|_| {
                    std::fs::rename(&partial, target).map_err(|e| RuntimeError::fs(target, e))
                });
            if result.is_err() {
                let _ = std::fs::remove_file(&partial);
            }
            result
        }
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| RuntimeError::fs(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}
