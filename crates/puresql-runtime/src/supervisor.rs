//! Process supervisor for the runtime server.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError};
use crate::health::HealthCheck;

/// Outcome of waiting for a freshly launched runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The health endpoint answered.
    Ready,
    /// The process terminated first.
    Exited(String),
    /// The startup timeout elapsed first.
    TimedOut,
}

/// How a running process was brought down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No process was owned; nothing was signalled.
    NotRunning,
    /// The process had already exited on its own.
    AlreadyExited,
    /// The process exited within the grace period.
    Graceful,
    /// The process was killed after the grace period.
    Forced,
}

/// Owns the runtime child process, if this manager spawned one.
#[derive(Default)]
pub struct ProcessSupervisor {
    child: Option<Child>,
}

impl ProcessSupervisor {
    /// Create a supervisor with no process attached.
    pub fn new() -> Self {
        Self { child: None }
    }

    /// Whether a process spawned by us is being tracked.
    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    /// PID of the tracked process, if it has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Spawn the runtime. The child inherits our environment plus `env`.
    pub fn launch(&mut self, binary: &Path, env: &[(String, String)], args: &[&str]) -> Result<u32> {
        if let Some(pid) = self.pid() {
            warn!("Runtime already launched (PID: {}), not spawning again", pid);
            return Ok(pid);
        }

        info!("Launching runtime {:?} {}", binary, args.join(" "));

        let child = Command::new(binary)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::LaunchFailed {
                binary: binary.to_path_buf(),
                source: e,
            })?;

        let pid = child.id().unwrap_or_default();
        debug!("Runtime process started with PID: {}", pid);
        self.child = Some(child);
        Ok(pid)
    }

    /// Wait until the runtime is healthy, has exited, or `timeout` elapses.
    ///
    /// The three conditions race: the probe runs every `interval`, while
    /// process exit and the deadline are observed continuously, so an early
    /// crash is reported immediately and a hung probe cannot outlive the
    /// deadline.
    pub async fn wait_until_healthy(
        &mut self,
        probe: &dyn HealthCheck,
        timeout: Duration,
        interval: Duration,
    ) -> Readiness {
        let Some(child) = self.child.as_mut() else {
            return Readiness::Exited("no runtime process was launched".to_string());
        };

        info!("Waiting for runtime to become ready...");

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                exit = child.wait() => {
                    break Readiness::Exited(match exit {
                        Ok(status) => format!("process exited with {}", status),
                        Err(e) => format!("process could not be waited on: {}", e),
                    });
                }
                _ = &mut deadline => break Readiness::TimedOut,
                healthy = async {
                    ticker.tick().await;
                    probe.check().await
                } => {
                    if healthy {
                        break Readiness::Ready;
                    }
                    debug!("Runtime not ready yet");
                }
            }
        };

        if let Readiness::Exited(reason) = &outcome {
            warn!("Runtime {}", reason);
            self.child = None;
        }
        outcome
    }

    /// Report and forget the process if it has exited on its own.
    pub fn poll_exit(&mut self) -> Option<String> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.child = None;
                Some(format!("process exited with {}", status))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Error checking runtime status: {}", e);
                None
            }
        }
    }

    /// Interrupt the process, then kill it if it outlives `grace`.
    ///
    /// The handle is released on every path, including signal failure.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Termination> {
        let Some(mut child) = self.child.take() else {
            return Ok(Termination::NotRunning);
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("Runtime already exited with status: {}", status);
            return Ok(Termination::AlreadyExited);
        }

        info!("Stopping runtime (PID: {:?})", child.id());

        if let Err(e) = send_interrupt(&mut child) {
            warn!("Failed to interrupt runtime: {}, killing", e);
            if let Err(kill_err) = child.kill().await {
                warn!("Failed to kill runtime: {}", kill_err);
            }
            return Err(RuntimeError::Signal(e));
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Runtime exited with status: {}", status);
                Ok(Termination::Graceful)
            }
            Ok(Err(e)) => {
                warn!("Error waiting for runtime: {}, killing", e);
                let _ = child.kill().await;
                Ok(Termination::Forced)
            }
            Err(_) => {
                warn!("Runtime didn't exit within {:?}, killing...", grace);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill runtime: {}", e);
                }
                Ok(Termination::Forced)
            }
        }
    }

    /// Kill the process immediately and reap it.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!("Killing runtime (PID: {:?})", child.id());
            if let Err(e) = child.kill().await {
                warn!("Failed to kill runtime: {}", e);
            }
        }
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) -> std::io::Result<()> {
    // `id()` is None once the child has been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) -> std::io::Result<()> {
    // No cooperative interrupt for a detached console process here.
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct HealthyAfter {
        calls: AtomicUsize,
        after: usize,
    }

    #[async_trait]
    impl HealthCheck for HealthyAfter {
        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.after
        }
    }

    struct NeverHealthy;

    #[async_trait]
    impl HealthCheck for NeverHealthy {
        async fn check(&self) -> bool {
            false
        }
    }

    fn sh(supervisor: &mut ProcessSupervisor, script: &str) {
        supervisor
            .launch(Path::new("/bin/sh"), &[], &["-c", script])
            .unwrap();
    }

    #[tokio::test]
    async fn test_ready_when_probe_passes() {
        let mut supervisor = ProcessSupervisor::new();
        sh(&mut supervisor, "sleep 30");
        let probe = HealthyAfter {
            calls: AtomicUsize::new(0),
            after: 3,
        };

        let outcome = supervisor
            .wait_until_healthy(&probe, Duration::from_secs(5), Duration::from_millis(50))
            .await;
        assert_eq!(outcome, Readiness::Ready);
        assert!(supervisor.has_process());
        supervisor.kill().await;
    }

    #[tokio::test]
    async fn test_premature_exit_fails_fast() {
        let mut supervisor = ProcessSupervisor::new();
        sh(&mut supervisor, "sleep 0.3; exit 3");

        let started = Instant::now();
        let outcome = supervisor
            .wait_until_healthy(&NeverHealthy, Duration::from_secs(60), Duration::from_millis(500))
            .await;
        assert!(matches!(outcome, Readiness::Exited(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!supervisor.has_process());
    }

    #[tokio::test]
    async fn test_timeout_is_bounded() {
        let mut supervisor = ProcessSupervisor::new();
        sh(&mut supervisor, "sleep 30");

        let started = Instant::now();
        let outcome = supervisor
            .wait_until_healthy(&NeverHealthy, Duration::from_secs(1), Duration::from_millis(500))
            .await;
        assert_eq!(outcome, Readiness::TimedOut);
        assert!(started.elapsed() < Duration::from_millis(1500) + Duration::from_millis(500));
        supervisor.kill().await;
    }

    #[tokio::test]
    async fn test_terminate_without_process_is_noop() {
        let mut supervisor = ProcessSupervisor::new();
        let outcome = supervisor.terminate(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, Termination::NotRunning);
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let mut supervisor = ProcessSupervisor::new();
        sh(&mut supervisor, "exec sleep 30");

        let outcome = supervisor.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome, Termination::Graceful);
        assert!(!supervisor.has_process());
    }

    #[tokio::test]
    async fn test_terminate_forces_stubborn_process() {
        let mut supervisor = ProcessSupervisor::new();
        sh(&mut supervisor, "trap '' INT; while true; do sleep 0.1; done");
        // Let the shell install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let outcome = supervisor
            .terminate(Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(outcome, Termination::Forced);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!supervisor.has_process());
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let mut supervisor = ProcessSupervisor::new();
        let err = supervisor
            .launch(Path::new("/nonexistent/runtime"), &[], &["serve"])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::LaunchFailed { .. }));
        assert!(!supervisor.has_process());
    }
}
