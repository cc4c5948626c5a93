//! Model commands against a running runtime.

use puresql_runtime::{GenerateOptions, PullProgress, RuntimeClient, RuntimeConfig};

use super::progress;

/// Fail early with a hint when nothing answers at the configured URL.
async fn connect(config: &RuntimeConfig) -> miette::Result<RuntimeClient> {
    let client = RuntimeClient::new(config.api_base_url());
    if client.health().await.is_err() {
        return Err(miette::miette!(
            "No runtime is reachable at {}. Start it with `puresql-runtime start`.",
            config.api_base_url()
        ));
    }
    Ok(client)
}

/// List installed models.
pub(crate) async fn list(config: &RuntimeConfig) -> miette::Result<()> {
    let client = connect(config).await?;
    let models = client
        .list_models()
        .await
        .map_err(|e| miette::miette!("Failed to list models: {}", e))?;

    if models.is_empty() {
        println!("No models installed.");
        println!();
        println!("To install the default model, run:");
        println!("  puresql-runtime pull {}", puresql_runtime::DEFAULT_MODEL);
        return Ok(());
    }

    println!("Installed models:");
    for model in models {
        match model.size {
            Some(size) => println!("  - {} ({:.1} GB)", model.name, size as f64 / 1e9),
            None => println!("  - {}", model.name),
        }
    }

    println!();
    println!("Models directory: {}", config.models_dir().display());

    Ok(())
}

/// Pull a model, showing download progress.
pub(crate) async fn pull(config: &RuntimeConfig, model: &str) -> miette::Result<()> {
    let client = connect(config).await?;

    if client.has_model(model).await.unwrap_or(false) {
        println!("Model '{}' is already installed.", model);
        return Ok(());
    }

    println!("Downloading model: {}", model);
    println!("This may take a while depending on your connection...");
    println!();

    let spinner = progress::bytes_bar(None)?;
    let mut bar: Option<indicatif::ProgressBar> = None;

    let result = client
        .pull(model, |update: &PullProgress| {
            match (update.total, update.completed) {
                (Some(total), Some(completed)) if total > 0 => {
                    let pb = bar.get_or_insert_with(|| {
                        spinner.finish_and_clear();
                        progress::bytes_bar(Some(total)).unwrap_or_else(|_| indicatif::ProgressBar::new(total))
                    });
                    pb.set_length(total);
                    pb.set_position(completed);
                    pb.set_message(update.status.clone());
                }
                _ => {
                    if let Some(pb) = &bar {
                        pb.set_message(update.status.clone());
                    } else {
                        spinner.set_message(update.status.clone());
                        spinner.tick();
                    }
                }
            }
        })
        .await;

    spinner.finish_and_clear();
    if let Some(pb) = &bar {
        pb.finish_and_clear();
    }

    result.map_err(|e| miette::miette!("Failed to download model: {}", e))?;
    println!("Model '{}' downloaded successfully!", model);

    Ok(())
}

/// Run one prompt and print the reply.
pub(crate) async fn generate(
    config: &RuntimeConfig,
    model: &str,
    prompt: &str,
    temperature: Option<f32>,
) -> miette::Result<()> {
    let client = connect(config).await?;
    let options = temperature.map(|t| GenerateOptions {
        temperature: Some(t),
        ..Default::default()
    });

    let response = client
        .generate(model, prompt, options.as_ref())
        .await
        .map_err(|e| miette::miette!("Generation failed: {}", e))?;

    println!("{}", response.response.trim());
    Ok(())
}
