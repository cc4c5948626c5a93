//! Lifecycle status record and the registry that publishes it.
//!
//! The registry holds exactly one current [`LifecycleStatus`]. Reads take a
//! shared lock and clone the record, writes apply a transform under the
//! exclusive lock, so a reader always observes a complete snapshot.
//! Every committed snapshot is also broadcast to subscribers.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered snapshots per subscriber before it starts skipping.
const SUBSCRIBER_BUFFER: usize = 1024;

/// Lifecycle state of the managed runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Checking,
    Downloading,
    Extracting,
    Installing,
    Installed,
    Starting,
    Running,
    Stopping,
    DownloadingModel,
    Error,
}

impl LifecycleState {
    /// The runtime answers requests in this state.
    pub fn is_serving(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::DownloadingModel)
    }

    /// Wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Checking => "checking",
            LifecycleState::Downloading => "downloading",
            LifecycleState::Extracting => "extracting",
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::DownloadingModel => "downloading_model",
            LifecycleState::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the runtime lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub downloaded_bytes: u64,
    /// Zero when the size is not known.
    pub total_bytes: u64,
    /// 0-100, exactly 100 only while running.
    pub progress_percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Last background model preload failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preload_error: Option<String>,
}

impl LifecycleStatus {
    /// Initial status of a freshly constructed manager.
    pub fn idle() -> Self {
        Self {
            state: LifecycleState::Idle,
            downloaded_bytes: 0,
            total_bytes: 0,
            progress_percent: 0.0,
            message: "Waiting for initialization".to_string(),
            error_detail: None,
            preload_error: None,
        }
    }

    /// Move to `state` with a new message and progress value.
    pub fn transition(&mut self, state: LifecycleState, message: impl Into<String>, progress: f64) {
        self.state = state;
        self.message = message.into();
        self.progress_percent = progress;
    }

    /// Move to the error state, keeping the step message and the cause.
    pub fn fail(&mut self, message: impl Into<String>, detail: impl Into<String>) {
        self.state = LifecycleState::Error;
        self.message = message.into();
        self.error_detail = Some(detail.into());
    }

    /// Re-establish the snapshot invariants after a transform.
    fn normalize(&mut self) {
        if !self.progress_percent.is_finite() {
            self.progress_percent = 0.0;
        }
        self.progress_percent = self.progress_percent.clamp(0.0, 100.0);
        if self.state == LifecycleState::Running {
            self.progress_percent = 100.0;
        } else if self.progress_percent >= 100.0 {
            // 100 is reserved for running.
            self.progress_percent = 99.0;
        }

        if self.state == LifecycleState::Error {
            let missing = self.error_detail.as_deref().map_or(true, str::is_empty);
            if missing {
                self.error_detail = Some(self.message.clone());
            }
        } else {
            self.error_detail = None;
        }
    }
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// Concurrency-safe holder of the current [`LifecycleStatus`].
///
/// Cloning is cheap and every clone refers to the same record.
#[derive(Clone)]
pub struct StatusRegistry {
    current: Arc<RwLock<LifecycleStatus>>,
    events: broadcast::Sender<LifecycleStatus>,
}

impl StatusRegistry {
    /// Create a registry holding the idle status.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            current: Arc::new(RwLock::new(LifecycleStatus::idle())),
            events,
        }
    }

    /// Return a consistent copy of the current status.
    pub fn get(&self) -> LifecycleStatus {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            // The record is normalized before the lock is released, so a
            // poisoned value is still a complete snapshot.
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply `transform` to the current status under exclusive access.
    ///
    /// Returns the committed snapshot.
    pub fn update<F>(&self, transform: F) -> LifecycleStatus
    where
        F: FnOnce(&mut LifecycleStatus),
    {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = guard.clone();
        transform(&mut next);
        next.normalize();
        *guard = next.clone();
        // Sent while still holding the lock so subscribers see commit order.
        let _ = self.events.send(next.clone());
        next
    }

    /// Shorthand for a plain state transition.
    pub fn transition(&self, state: LifecycleState, message: impl Into<String>, progress: f64) {
        let message = message.into();
        self.update(|s| s.transition(state, message, progress));
    }

    /// Shorthand for recording a terminal error.
    pub fn fail(&self, message: impl Into<String>, detail: impl Into<String>) {
        let (message, detail) = (message.into(), detail.into());
        self.update(|s| s.fail(message, detail));
    }

    /// Receive every snapshot committed from now on.
    ///
    /// A subscriber that falls behind skips the oldest snapshots rather
    /// than slowing down writers.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleStatus> {
        self.events.subscribe()
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
