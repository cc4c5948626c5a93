//! Local model-runtime lifecycle management for pureSQL.
//!
//! This crate detects, installs, launches, monitors and stops the local
//! inference server that backs natural-language queries, and publishes a
//! continuously updated status for the UI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │  RuntimeManager  │ --> │ BinaryProvisioner │ --> │  platform table  │
//! │  start/stop      │     │ download/extract  │     └──────────────────┘
//! └──────────────────┘     └───────────────────┘
//!        │   │
//!        │   └──────────> ProcessSupervisor ──> HealthProbe (GET /api/health)
//!        │
//!        └──> StatusRegistry (RwLock snapshot + broadcast)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use puresql_runtime::{RuntimeConfig, RuntimeManager};
//!
//! let manager = RuntimeManager::new(RuntimeConfig::from_env()?);
//! manager.start().await?;
//! println!("{:?}", manager.status());
//! manager.stop().await?;
//! ```

mod client;
mod config;
mod error;
mod health;
mod manager;
pub mod paths;
pub mod platform;
mod provision;
mod status;
mod supervisor;

pub use client::{GenerateOptions, GenerateResponse, ModelEntry, PullProgress, RuntimeClient};
pub use config::{RuntimeConfig, RuntimeConfigBuilder};
pub use error::{Result, RuntimeError};
pub use health::{HealthCheck, HealthProbe, HEALTH_PATH};
pub use manager::RuntimeManager;
pub use platform::{ArtifactDescriptor, ArtifactKind};
pub use provision::{BinaryProvisioner, Provisioned};
pub use status::{LifecycleState, LifecycleStatus, StatusRegistry};
pub use supervisor::{ProcessSupervisor, Readiness, Termination};

/// Default port of the local runtime.
pub const DEFAULT_PORT: u16 = 11434;

/// Model preloaded once the runtime is up.
pub const DEFAULT_MODEL: &str = "llama3.2:latest";
