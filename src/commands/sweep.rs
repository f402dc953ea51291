use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crate::reclaim::ReclamationScheduler;

/// Reclamation sweep actions.
#[derive(Subcommand, Debug)]
pub enum SweepAction {
    /// Stop running sandboxes idle past the configured threshold
    Idle,
    /// Remove exited containers and release their lingering ports
    Stale,
}

pub async fn run(action: SweepAction) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = crate::config::Config::load(&cwd)?;
    let controller = super::build_controller()?;

    match action {
        SweepAction::Idle => {
            // One-shot CLI invocation has no in-memory activity history;
            // reconcile every known container first so the sweep sees
            // live statuses.
            for listing in controller.list_all().await? {
                if let Some(user_id) = listing.user_id {
                    let _ = controller.status(user_id).await;
                }
            }
            let scheduler = ReclamationScheduler::new(controller, &config.reclaim);
            let stopped = scheduler.run_idle_sweep().await;
            println!(
                "{} Idle sweep stopped {} sandbox(es).",
                "✓".green(),
                stopped.to_string().cyan()
            );
        }
        SweepAction::Stale => {
            let removed = controller.sweep_stale().await?;
            println!(
                "{} Removed {} stale container(s).",
                "✓".green(),
                removed.to_string().cyan()
            );
        }
    }

    Ok(())
}
