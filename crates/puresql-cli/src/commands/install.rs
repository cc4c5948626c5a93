//! Install command - provision the runtime binary only.

use puresql_runtime::{BinaryProvisioner, HealthProbe, Provisioned, RuntimeConfig, StatusRegistry};

use super::progress;

pub(crate) async fn run(config: &RuntimeConfig) -> miette::Result<()> {
    let status = StatusRegistry::new();
    let provisioner = BinaryProvisioner::new(status.clone());
    let probe = HealthProbe::new(config.api_base_url(), config.probe_timeout());

    let pb = progress::status_bar()?;
    let renderer = progress::follow(&status, pb.clone());
    let outcome = provisioner.ensure(config, &probe).await;
    renderer.abort();
    pb.finish_and_clear();

    match outcome.map_err(|e| miette::miette!("Failed to install runtime: {}", e))? {
        Provisioned::External => {
            println!(
                "A runtime is already serving at {}; nothing installed.",
                config.api_base_url()
            );
        }
        Provisioned::AlreadyInstalled => {
            println!("Runtime already installed at {}", config.binary_path().display());
        }
        Provisioned::Installed => {
            println!("Runtime installed successfully!");
            println!("Location: {}", config.binary_path().display());
        }
    }

    Ok(())
}
