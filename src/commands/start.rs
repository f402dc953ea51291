use anyhow::Result;
use colored::Colorize;

pub async fn run(user_id: i64) -> Result<()> {
    let controller = super::build_controller()?;
    let endpoint = controller.start(user_id).await?;

    println!(
        "{} Sandbox for user {} is running.",
        "✓".green(),
        user_id.to_string().cyan()
    );
    println!("  URL:  {}", endpoint.url.green());
    println!("  Port: {}", endpoint.port.to_string().cyan());

    Ok(())
}
