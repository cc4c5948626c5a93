//! Status command - one-shot reachability check.

use puresql_runtime::{RuntimeConfig, RuntimeManager};

pub(crate) async fn run(config: RuntimeConfig, json: bool) -> miette::Result<()> {
    let manager = RuntimeManager::new(config);
    let running = manager.is_running().await;
    let status = manager.status();

    if json {
        let out = serde_json::json!({
            "running": running,
            "url": manager.config().api_base_url(),
            "status": status,
        });
        let text = serde_json::to_string_pretty(&out)
            .map_err(|e| miette::miette!("Failed to serialize status: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Runtime URL: {}", manager.config().api_base_url());
    println!("Reachable:   {}", if running { "yes" } else { "no" });
    println!("State:       {}", status.state);
    println!("Message:     {}", status.message);
    if let Some(detail) = &status.error_detail {
        println!("Error:       {}", detail);
    }

    Ok(())
}
