//! Start command - run the local runtime in the foreground.

use puresql_runtime::{RuntimeConfig, RuntimeManager};

use super::progress;

pub(crate) async fn run(config: RuntimeConfig) -> miette::Result<()> {
    let manager = RuntimeManager::new(config);

    let pb = progress::status_bar()?;
    let renderer = progress::follow(manager.status_registry(), pb.clone());

    // The start future is dropped before stopping, releasing its lock and
    // any scratch download directory.
    let started = tokio::select! {
        result = manager.start() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(started) = started else {
        renderer.abort();
        pb.abandon_with_message("Interrupted");
        if let Err(e) = manager.stop().await {
            tracing::warn!("Failed to stop runtime after interrupt: {}", e);
        }
        return Err(miette::miette!("Startup interrupted"));
    };

    if let Err(e) = started {
        renderer.abort();
        pb.abandon();
        let status = manager.status();
        return Err(miette::miette!(
            "{}: {}",
            status.message,
            status.error_detail.unwrap_or_else(|| e.to_string())
        ));
    }

    pb.println(format!(
        "Runtime is running at {}{}",
        manager.config().api_base_url(),
        if manager.is_adopted() {
            " (external instance)"
        } else {
            ""
        }
    ));
    pb.println("Press Ctrl-C to stop.");

    // Keep rendering: model preloading reports through the same status.
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for Ctrl-C: {}", e))?;

    renderer.abort();
    pb.finish_and_clear();

    if manager.is_adopted() {
        println!("Leaving the external runtime running.");
        return Ok(());
    }

    println!("Stopping runtime...");
    manager
        .stop()
        .await
        .map_err(|e| miette::miette!("Failed to stop runtime: {}", e))?;
    println!("{}", manager.status().message);

    Ok(())
}
