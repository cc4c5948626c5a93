//! Terminal rendering of lifecycle status updates.

use indicatif::{ProgressBar, ProgressStyle};
use puresql_runtime::{LifecycleStatus, StatusRegistry};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// A 0-100 bar for lifecycle progress.
pub(crate) fn status_bar() -> miette::Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// A byte-count bar, or a spinner when the size is unknown.
pub(crate) fn bytes_bar(total: Option<u64>) -> miette::Result<ProgressBar> {
    let pb = match total {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
                    .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?
                    .progress_chars("#>-"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .map_err(|e| miette::miette!("Invalid progress bar template: {}", e))?,
            );
            pb
        }
    };
    Ok(pb)
}

/// Mirror every status update of `registry` onto `pb` until aborted.
pub(crate) fn follow(registry: &StatusRegistry, pb: ProgressBar) -> JoinHandle<()> {
    let mut events = registry.subscribe();
    render(&pb, &registry.get());

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(status) => render(&pb, &status),
                // Only the latest snapshot matters for display.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn render(pb: &ProgressBar, status: &LifecycleStatus) {
    pb.set_position(status.progress_percent.round() as u64);
    pb.set_message(format!("{}: {}", status.state, status.message));
}
