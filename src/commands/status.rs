use anyhow::Result;
use colored::Colorize;

use crate::store::SandboxStatus;

pub async fn run(user_id: i64, json: bool) -> Result<()> {
    let controller = super::build_controller()?;
    let record = controller.status(user_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("\n{}", "━".repeat(50).dimmed());
    println!("{}", "   Sandbox Status".yellow().bold());
    println!("{}", "━".repeat(50).dimmed());

    let status = match record.status {
        SandboxStatus::Running => record.status.to_string().green().bold(),
        SandboxStatus::Error | SandboxStatus::RuntimeUnavailable => {
            record.status.to_string().red()
        }
        _ => record.status.to_string().yellow(),
    };
    println!("  User:       {}", record.user_id.to_string().cyan());
    println!("  Status:     {}", status);
    println!("  Container:  {}", record.container_name.cyan());
    println!(
        "  Port:       {}",
        record
            .assigned_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "none".to_string())
            .cyan()
    );
    if record.status == SandboxStatus::Running {
        if let Some(port) = record.assigned_port {
            println!("  URL:        {}", controller.config().endpoint_url(port).green());
        }
    }
    println!(
        "  Workspace:  {}",
        record.workspace_path.display().to_string().cyan()
    );
    println!(
        "  Last seen:  {}",
        record
            .last_activity_at
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
            .cyan()
    );
    println!("{}", "━".repeat(50).dimmed());

    Ok(())
}
