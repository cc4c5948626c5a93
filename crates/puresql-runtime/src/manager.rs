//! Runtime lifecycle manager.
//!
//! Drives `idle → checking → [downloading → extracting → installing] →
//! installed → starting → running → stopping → idle`, with `error` reachable
//! from any step and left only by a new [`RuntimeManager::start`]. Model
//! preloading runs beside `running` as `downloading_model` and never moves
//! the state to `error`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::{PullProgress, RuntimeClient};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::health::{HealthCheck, HealthProbe};
use crate::provision::{BinaryProvisioner, Provisioned};
use crate::status::{LifecycleState, LifecycleStatus, StatusRegistry};
use crate::supervisor::{ProcessSupervisor, Readiness, Termination};

const STARTING_PROGRESS: f64 = 97.0;

/// Arguments the runtime is launched with.
const SERVE_ARGS: &[&str] = &["serve"];

/// Manages exactly one local runtime instance at the configured endpoint.
pub struct RuntimeManager {
    config: RuntimeConfig,
    status: StatusRegistry,
    probe: HealthProbe,
    provisioner: BinaryProvisioner,
    /// Held for the whole of `start`/`stop`, so launch and terminate never overlap.
    supervisor: Mutex<ProcessSupervisor>,
    /// Serving through an instance we did not spawn.
    adopted: AtomicBool,
    preload: StdMutex<Option<JoinHandle<()>>>,
}

impl RuntimeManager {
    pub fn new(config: RuntimeConfig) -> Self {
        let status = StatusRegistry::new();
        Self {
            probe: HealthProbe::new(config.api_base_url(), config.probe_timeout()),
            provisioner: BinaryProvisioner::new(status.clone()),
            status,
            config,
            supervisor: Mutex::new(ProcessSupervisor::new()),
            adopted: AtomicBool::new(false),
            preload: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current status snapshot. Never blocks on `start`/`stop`.
    pub fn status(&self) -> LifecycleStatus {
        self.status.get()
    }

    /// Shared handle to the status registry, for subscribing to updates.
    pub fn status_registry(&self) -> &StatusRegistry {
        &self.status
    }

    /// Client bound to the managed runtime.
    pub fn client(&self) -> RuntimeClient {
        RuntimeClient::new(self.config.api_base_url())
    }

    /// Whether the runtime in use was adopted rather than spawned.
    pub fn is_adopted(&self) -> bool {
        self.adopted.load(Ordering::SeqCst)
    }

    /// Install if needed and start the runtime, or adopt a running one.
    ///
    /// Idempotent: returns immediately when the runtime is already serving.
    pub async fn start(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;

        if self.status.get().state.is_serving() {
            if supervisor.has_process() && supervisor.poll_exit().is_none() {
                debug!("Runtime already running, nothing to start");
                return Ok(());
            }
            if self.is_adopted() && self.probe.check().await {
                debug!("Adopted runtime still healthy, nothing to start");
                return Ok(());
            }
        }
        // Whatever was serving before is gone.
        supervisor.kill().await;
        self.adopted.store(false, Ordering::SeqCst);

        self.status.transition(
            LifecycleState::Checking,
            "Checking for a running runtime",
            0.0,
        );

        if self.config.prefer_external() && self.probe.check().await {
            self.adopt_external();
            return Ok(());
        }

        match self.provisioner.ensure(&self.config, &self.probe).await? {
            Provisioned::External => {
                self.adopt_external();
                return Ok(());
            }
            Provisioned::AlreadyInstalled | Provisioned::Installed => {}
        }

        self.status.transition(
            LifecycleState::Starting,
            "Starting the runtime",
            STARTING_PROGRESS,
        );

        if let Err(e) = supervisor.launch(
            self.config.binary_path(),
            &self.config.child_env(),
            SERVE_ARGS,
        ) {
            error!("Failed to launch runtime: {}", e);
            self.status.fail("Failed to launch the runtime", e.to_string());
            return Err(e);
        }

        let readiness = supervisor
            .wait_until_healthy(
                &self.probe,
                self.config.startup_timeout(),
                self.config.poll_interval(),
            )
            .await;

        match readiness {
            Readiness::Ready => {
                info!("Runtime is ready at {}", self.config.api_base_url());
                self.status.update(|s| {
                    s.transition(LifecycleState::Running, "Runtime is running", 100.0);
                    s.preload_error = None;
                });
                self.spawn_preload();
                Ok(())
            }
            Readiness::Exited(reason) => {
                let err = RuntimeError::ExitedPrematurely(reason);
                self.status.fail("Failed to start the runtime", err.to_string());
                Err(err)
            }
            Readiness::TimedOut => {
                supervisor.kill().await;
                let err = RuntimeError::StartTimeout(self.config.startup_timeout());
                error!("{}", err);
                self.status.fail("Failed to start the runtime", err.to_string());
                Err(err)
            }
        }
    }

    /// Stop the runtime if this manager spawned it.
    ///
    /// A no-op when nothing was spawned, including when an external runtime
    /// was adopted. The process handle is released even on failure.
    pub async fn stop(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock().await;
        self.abort_preload();

        if !supervisor.has_process() {
            debug!("No runtime process owned, nothing to stop");
            return Ok(());
        }

        self.status
            .transition(LifecycleState::Stopping, "Stopping the runtime", 0.0);

        match supervisor.terminate(self.config.grace_period()).await {
            Ok(Termination::Forced) => {
                self.status.transition(
                    LifecycleState::Idle,
                    "Runtime was forced to stop",
                    0.0,
                );
                Ok(())
            }
            Ok(_) => {
                info!("Runtime stopped");
                self.status
                    .transition(LifecycleState::Idle, "Runtime stopped", 0.0);
                Ok(())
            }
            Err(e) => {
                error!("Failed to stop runtime: {}", e);
                self.status.fail("Failed to stop the runtime", e.to_string());
                Err(e)
            }
        }
    }

    /// Live check: probes the health endpoint on every call.
    ///
    /// Also reconciles the cached state with what the probe sees: a newly
    /// appeared external runtime is adopted (when preferred), a vanished
    /// adopted one drops back to idle, and an unexpected exit of our own
    /// process is recorded as an error.
    pub async fn is_running(&self) -> bool {
        let healthy = self.probe.check().await;

        // Never interfere with an in-flight start or stop.
        let Ok(mut supervisor) = self.supervisor.try_lock() else {
            return healthy;
        };
        let state = self.status.get().state;

        if let Some(reason) = supervisor.poll_exit() {
            self.abort_preload();
            let err = RuntimeError::ExitedPrematurely(reason);
            warn!("{}", err);
            self.status
                .fail("The runtime stopped unexpectedly", err.to_string());
            return healthy;
        }

        if healthy {
            let idle = matches!(state, LifecycleState::Idle | LifecycleState::Error);
            if idle && !supervisor.has_process() && self.config.prefer_external() {
                self.adopt_external();
            }
        } else if self.is_adopted() && state.is_serving() {
            warn!(
                "External runtime at {} is no longer reachable",
                self.config.api_base_url()
            );
            self.adopted.store(false, Ordering::SeqCst);
            self.status.transition(
                LifecycleState::Idle,
                "External runtime is no longer reachable",
                0.0,
            );
        }
        healthy
    }

    fn adopt_external(&self) {
        info!(
            "External runtime detected at {}, using it",
            self.config.api_base_url()
        );
        self.adopted.store(true, Ordering::SeqCst);
        self.status.update(|s| {
            s.transition(
                LifecycleState::Running,
                "Using the external runtime already running",
                100.0,
            );
            s.preload_error = None;
        });
    }

    /// Pull missing default models in the background.
    fn spawn_preload(&self) {
        let models = self.config.default_models().to_vec();
        if models.is_empty() {
            return;
        }
        let client = self.client();
        let status = self.status.clone();
        let handle = tokio::spawn(preload_models(client, status, models));

        let mut slot = match self.preload.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel a running preload without waiting for it.
    fn abort_preload(&self) {
        let mut slot = match self.preload.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

impl Drop for RuntimeManager {
    fn drop(&mut self) {
        self.abort_preload();
    }
}

async fn preload_models(client: RuntimeClient, status: StatusRegistry, models: Vec<String>) {
    for model in models {
        match client.has_model(&model).await {
            Ok(true) => {
                debug!("Model {} already available", model);
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                // Listing failed; try the pull anyway.
                debug!("Could not list models: {}", e);
            }
        }

        info!("Pulling model {}", model);
        let serving = status.update(|s| {
            if s.state.is_serving() {
                s.transition(
                    LifecycleState::DownloadingModel,
                    format!("Downloading model {}", model),
                    0.0,
                );
                s.downloaded_bytes = 0;
                s.total_bytes = 0;
            }
        });
        if !serving.state.is_serving() {
            return;
        }

        let result = client
            .pull(&model, |progress: &PullProgress| {
                status.update(|s| {
                    if s.state != LifecycleState::DownloadingModel {
                        return;
                    }
                    if let (Some(total), Some(completed)) = (progress.total, progress.completed) {
                        if total > 0 {
                            s.total_bytes = total;
                            s.downloaded_bytes = completed.min(total);
                            s.progress_percent = completed.min(total) as f64 / total as f64 * 99.0;
                        }
                    }
                    if !progress.status.is_empty() {
                        s.message = format!("Downloading model {}: {}", model, progress.status);
                    }
                });
            })
            .await;

        status.update(|s| {
            if !s.state.is_serving() {
                return;
            }
            match &result {
                Ok(()) => {
                    s.transition(LifecycleState::Running, "Runtime is running", 100.0);
                }
                Err(e) => {
                    s.transition(
                        LifecycleState::Running,
                        format!("Runtime is running (model {} unavailable)", model),
                        100.0,
                    );
                    s.preload_error = Some(format!("Failed to download model {}: {}", model, e));
                }
            }
        });

        match result {
            Ok(()) => info!("Model {} is available", model),
            Err(e) => warn!("Failed to pull model {}: {}", model, e),
        }
    }
}
