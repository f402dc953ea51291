use anyhow::{Context, Result};
use colored::Colorize;
use std::time::Duration;

use crate::reclaim::ReclamationScheduler;

/// Schedule the logout-grace check for a user and wait for it to fire.
pub async fn run(user_id: i64) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = crate::config::Config::load(&cwd)?;
    let controller = super::build_controller()?;

    // Reconcile ground truth first so the deferred check sees the
    // container this process did not start itself.
    let record = controller.status(user_id).await?;
    let scheduler = ReclamationScheduler::new(controller, &config.reclaim);
    scheduler.schedule_logout_cleanup(user_id);

    println!(
        "{} Sandbox for user {} is {}; cleanup check fires in {}s.",
        "ℹ".blue(),
        user_id.to_string().cyan(),
        record.status.to_string().yellow(),
        config.reclaim.logout_grace_secs
    );

    while scheduler.logout_pending(user_id) {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    println!("{} Logout cleanup check completed.", "✓".green());

    Ok(())
}
