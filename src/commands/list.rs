use anyhow::Result;
use colored::Colorize;

use crate::store::SandboxStatus;

pub async fn run(json: bool) -> Result<()> {
    let controller = super::build_controller()?;
    let listings = controller.list_all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("\n{} No sandbox containers found.", "ℹ".blue());
        return Ok(());
    }

    println!("\n{:<24} {:<10} {:<8} {}", "CONTAINER", "STATUS", "PORT", "USER");
    for listing in listings {
        let status = match listing.status {
            SandboxStatus::Running => listing.status.to_string().green(),
            _ => listing.status.to_string().yellow(),
        };
        println!(
            "{:<24} {:<10} {:<8} {}",
            listing.container_name,
            status,
            listing
                .host_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            listing
                .user_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
    }

    Ok(())
}
