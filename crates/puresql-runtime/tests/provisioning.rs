//! Binary provisioning against a fake artifact server.

mod support;

use std::path::Path;
use std::time::Duration;

use puresql_runtime::{
    ArtifactDescriptor, BinaryProvisioner, HealthProbe, LifecycleState, Provisioned,
    RuntimeConfig, RuntimeError, StatusRegistry,
};
use support::{FakeRuntime, Health, ARTIFACT_SIZE};

fn setup(dir: &Path, fake: &FakeRuntime, artifact: ArtifactDescriptor) -> (RuntimeConfig, HealthProbe) {
    let config = RuntimeConfig::builder(dir)
        .port(fake.port)
        .prefer_external(false)
        .artifact(artifact)
        .build()
        .unwrap();
    let probe = HealthProbe::new(config.api_base_url(), Duration::from_secs(1));
    (config, probe)
}

fn scratch_entries(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(".runtime-download-") || n.ends_with(".partial"))
        .collect()
}

#[tokio::test]
async fn test_download_reports_monotonic_capped_progress() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::executable(fake.url("/artifact")),
    );

    let status = StatusRegistry::new();
    let mut events = status.subscribe();
    let provisioner = BinaryProvisioner::new(status.clone());

    let outcome = provisioner.ensure(&config, &probe).await.unwrap();
    assert_eq!(outcome, Provisioned::Installed);

    let mut progress = Vec::new();
    while let Ok(snapshot) = events.try_recv() {
        if snapshot.state == LifecycleState::Downloading {
            assert!(snapshot.progress_percent <= 90.0, "{:?}", snapshot);
            progress.push(snapshot.progress_percent);
        }
    }
    assert!(progress.len() > 2);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(progress.last().copied(), Some(90.0));

    let last = status.get();
    assert_eq!(last.state, LifecycleState::Installed);
    assert_eq!(last.downloaded_bytes, ARTIFACT_SIZE as u64);
    assert_eq!(last.total_bytes, ARTIFACT_SIZE as u64);

    let metadata = std::fs::metadata(config.binary_path()).unwrap();
    assert_eq!(metadata.len(), ARTIFACT_SIZE as u64);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
    }
    assert!(scratch_entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_installed_binary_is_reused() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::executable(fake.url("/artifact")),
    );
    let provisioner = BinaryProvisioner::new(StatusRegistry::new());

    assert_eq!(
        provisioner.ensure(&config, &probe).await.unwrap(),
        Provisioned::Installed
    );
    assert_eq!(
        provisioner.ensure(&config, &probe).await.unwrap(),
        Provisioned::AlreadyInstalled
    );
    assert_eq!(fake.artifact_hits(), 1);
}

#[tokio::test]
async fn test_http_error_leaves_nothing_installed() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::executable(fake.url("/missing")),
    );
    let status = StatusRegistry::new();
    let provisioner = BinaryProvisioner::new(status.clone());

    let err = provisioner.ensure(&config, &probe).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Download(_)), "{:?}", err);

    assert!(!config.binary_path().exists());
    assert!(scratch_entries(tmp.path()).is_empty());
    let snapshot = status.get();
    assert_eq!(snapshot.state, LifecycleState::Error);
    assert_eq!(snapshot.message, "Failed to download the runtime");
    assert!(snapshot.error_detail.unwrap().contains("404"));
}

#[tokio::test]
async fn test_checksum_mismatch_is_rejected() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::executable(fake.url("/artifact")).with_sha256("00".repeat(32)),
    );
    let status = StatusRegistry::new();
    let provisioner = BinaryProvisioner::new(status.clone());

    let err = provisioner.ensure(&config, &probe).await.unwrap_err();
    assert!(matches!(err, RuntimeError::ChecksumMismatch { .. }));
    assert!(!config.binary_path().exists());
    assert_eq!(status.get().state, LifecycleState::Error);
}

#[tokio::test]
async fn test_external_runtime_skips_install() {
    let fake = FakeRuntime::start(Health::Immediately, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let config = RuntimeConfig::builder(tmp.path())
        .port(fake.port)
        .artifact(ArtifactDescriptor::executable(fake.url("/artifact")))
        .build()
        .unwrap();
    let probe = HealthProbe::new(config.api_base_url(), Duration::from_secs(1));
    let provisioner = BinaryProvisioner::new(StatusRegistry::new());

    let outcome = provisioner.ensure(&config, &probe).await.unwrap();
    assert_eq!(outcome, Provisioned::External);
    assert_eq!(fake.artifact_hits(), 0);
    assert!(!config.binary_path().exists());
}

#[tokio::test]
async fn test_corrupt_archive_is_reported() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::zip_archive(fake.url("/garbage.zip")),
    );
    let status = StatusRegistry::new();
    let provisioner = BinaryProvisioner::new(status.clone());

    let err = provisioner.ensure(&config, &probe).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Archive(_)), "{:?}", err);
    assert!(!config.binary_path().exists());
    assert!(scratch_entries(tmp.path()).is_empty());

    let snapshot = status.get();
    assert_eq!(snapshot.state, LifecycleState::Error);
    assert_eq!(snapshot.message, "Failed to extract the runtime archive");
}

/// Zip an `Ollama.app` bundle holding `payload` as `Contents/Resources/ollama`.
#[cfg(unix)]
fn bundle_zip(payload: &[u8]) -> Vec<u8> {
    let src = tempfile::tempdir().unwrap();
    let resources = src.path().join("Ollama.app").join("Contents").join("Resources");
    std::fs::create_dir_all(&resources).unwrap();
    std::fs::write(resources.join("ollama"), payload).unwrap();

    let archive = src.path().join("Ollama-darwin.zip");
    let status = std::process::Command::new("zip")
        .current_dir(src.path())
        .arg("-q")
        .arg("-r")
        .arg(&archive)
        .arg("Ollama.app")
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::read(&archive).unwrap()
}

#[cfg(unix)]
#[tokio::test]
async fn test_zip_bundle_is_extracted_and_installed() {
    use std::os::unix::fs::PermissionsExt;

    let payload = b"#!/bin/sh\nexec sleep 30\n";
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    fake.serve_archive(bundle_zip(payload));
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::zip_archive(fake.url("/bundle.zip")),
    );

    let status = StatusRegistry::new();
    let mut events = status.subscribe();
    let provisioner = BinaryProvisioner::new(status.clone());

    let outcome = provisioner.ensure(&config, &probe).await.unwrap();
    assert_eq!(outcome, Provisioned::Installed);

    let mut steps = Vec::new();
    while let Ok(snapshot) = events.try_recv() {
        steps.push((snapshot.state, snapshot.progress_percent));
    }
    let download_end = steps
        .iter()
        .rposition(|(state, _)| *state == LifecycleState::Downloading)
        .unwrap();
    let downloading: Vec<f64> = steps[..=download_end]
        .iter()
        .filter(|(state, _)| *state == LifecycleState::Downloading)
        .map(|(_, progress)| *progress)
        .collect();
    assert!(downloading.iter().all(|p| *p <= 70.0), "{:?}", steps);
    assert!(downloading.windows(2).all(|w| w[0] <= w[1]), "{:?}", steps);
    assert_eq!(downloading.last().copied(), Some(70.0));
    assert_eq!(
        steps[download_end + 1..],
        [
            (LifecycleState::Extracting, 75.0),
            (LifecycleState::Installing, 92.0),
            (LifecycleState::Installed, 95.0),
        ]
    );

    assert_eq!(std::fs::read(config.binary_path()).unwrap(), payload);
    let mode = std::fs::metadata(config.binary_path())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
    assert!(scratch_entries(tmp.path()).is_empty());
}

#[tokio::test]
async fn test_interrupted_install_leftovers_are_swept() {
    let fake = FakeRuntime::start(Health::Never, &[]).await;
    let tmp = tempfile::tempdir().unwrap();
    let (config, probe) = setup(
        tmp.path(),
        &fake,
        ArtifactDescriptor::executable(fake.url("/artifact")),
    );

    // What a process killed mid-download leaves behind.
    let stale = tmp.path().join(".runtime-download-x7Qp2a");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("ollama"), vec![0u8; 4096]).unwrap();
    assert_eq!(scratch_entries(tmp.path()).len(), 1);

    let provisioner = BinaryProvisioner::new(StatusRegistry::new());
    let outcome = provisioner.ensure(&config, &probe).await.unwrap();

    assert_eq!(outcome, Provisioned::Installed);
    assert!(!stale.exists());
    assert!(scratch_entries(tmp.path()).is_empty());
    assert_eq!(
        std::fs::metadata(config.binary_path()).unwrap().len(),
        ARTIFACT_SIZE as u64
    );
}
