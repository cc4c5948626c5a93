//! Info command - show the resolved runtime configuration.

use puresql_runtime::{platform, RuntimeConfig};

pub(crate) fn run(config: &RuntimeConfig) -> miette::Result<()> {
    println!("pureSQL Local Runtime Configuration");
    println!("===================================");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Install directory: {}", config.install_dir().display());
    println!("Models directory:  {}", config.models_dir().display());
    println!();
    println!("Runtime binary:    {}", config.binary_path().display());
    println!("  Exists: {}", config.binary_path().exists());

    let artifact = match config.artifact_override() {
        Some(artifact) => Ok(artifact.clone()),
        None => platform::current(),
    };
    match artifact {
        Ok(artifact) => println!("  Source: {}", artifact.url),
        Err(e) => println!("  Source: unavailable ({})", e),
    }
    println!();

    println!("Host:              {}", config.host());
    println!("Port:              {}", config.port());
    println!("API URL:           {}", config.api_base_url());
    println!("Prefer external:   {}", config.prefer_external());
    println!(
        "Startup timeout:   {}s",
        config.startup_timeout().as_secs_f64()
    );
    if config.default_models().is_empty() {
        println!("Default models:    (none)");
    } else {
        println!("Default models:    {}", config.default_models().join(", "));
    }

    Ok(())
}
