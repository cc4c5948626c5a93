//! Static table of runtime downloads per platform.

use crate::error::{Result, RuntimeError};

/// How a downloaded artifact becomes the runtime executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The download is the executable itself.
    Executable,
    /// A zip archive holding the executable, possibly inside an app bundle.
    ZipArchive,
}

/// Where and how to fetch the runtime for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub url: String,
    pub kind: ArtifactKind,
    /// Whether the executable needs permission bits set after install.
    pub needs_exec_bit: bool,
    /// Expected SHA-256 of the download, hex encoded.
    pub sha256: Option<String>,
}

impl ArtifactDescriptor {
    /// Descriptor for a directly executable download.
    pub fn executable(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ArtifactKind::Executable,
            needs_exec_bit: cfg!(unix),
            sha256: None,
        }
    }

    /// Descriptor for a zip archive download.
    pub fn zip_archive(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind: ArtifactKind::ZipArchive,
            needs_exec_bit: cfg!(unix),
            sha256: None,
        }
    }

    /// Require the download to match a hex-encoded SHA-256 digest.
    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.sha256 = Some(digest.into());
        self
    }

    /// Share of the overall progress bar reserved for the download.
    ///
    /// Archives leave more room for extraction.
    pub fn download_progress_cap(&self) -> f64 {
        match self.kind {
            ArtifactKind::Executable => 90.0,
            ArtifactKind::ZipArchive => 70.0,
        }
    }
}

struct PlatformEntry {
    os: &'static str,
    arch: &'static str,
    url: &'static str,
    kind: ArtifactKind,
    needs_exec_bit: bool,
}

/// Keys use `std::env::consts::{OS, ARCH}` spelling.
const PLATFORMS: &[PlatformEntry] = &[
    PlatformEntry {
        os: "macos",
        arch: "x86_64",
        url: "https://ollama.com/download/Ollama-darwin.zip",
        kind: ArtifactKind::ZipArchive,
        needs_exec_bit: true,
    },
    PlatformEntry {
        os: "macos",
        arch: "aarch64",
        url: "https://ollama.com/download/Ollama-darwin.zip",
        kind: ArtifactKind::ZipArchive,
        needs_exec_bit: true,
    },
    PlatformEntry {
        os: "linux",
        arch: "x86_64",
        url: "https://ollama.com/download/ollama-linux-amd64",
        kind: ArtifactKind::Executable,
        needs_exec_bit: true,
    },
    PlatformEntry {
        os: "linux",
        arch: "aarch64",
        url: "https://ollama.com/download/ollama-linux-arm64",
        kind: ArtifactKind::Executable,
        needs_exec_bit: true,
    },
    PlatformEntry {
        os: "windows",
        arch: "x86_64",
        url: "https://ollama.com/download/ollama-windows-amd64.exe",
        kind: ArtifactKind::Executable,
        needs_exec_bit: false,
    },
];

/// Look up the download for an OS/architecture pair.
pub fn resolve(os: &str, arch: &str) -> Result<ArtifactDescriptor> {
    PLATFORMS
        .iter()
        .find(|entry| entry.os == os && entry.arch == arch)
        .map(|entry| ArtifactDescriptor {
            url: entry.url.to_string(),
            kind: entry.kind,
            needs_exec_bit: entry.needs_exec_bit,
            sha256: None,
        })
        .ok_or_else(|| RuntimeError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

/// Download for the platform this binary was built for.
pub fn current() -> Result<ArtifactDescriptor> {
    resolve(std::env::consts::OS, std::env::consts::ARCH)
}
