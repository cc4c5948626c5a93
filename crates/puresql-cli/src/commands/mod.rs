//! CLI commands.

pub mod info;
pub mod install;
pub mod model;
pub mod progress;
pub mod start;
pub mod status;

use puresql_runtime::RuntimeConfig;

/// Resolve configuration from the environment.
pub(crate) fn load_config() -> miette::Result<RuntimeConfig> {
    RuntimeConfig::from_env().map_err(|e| miette::miette!("Invalid configuration: {}", e))
}
