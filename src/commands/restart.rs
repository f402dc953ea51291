use anyhow::Result;
use colored::Colorize;

pub async fn run(user_id: i64) -> Result<()> {
    let controller = super::build_controller()?;
    let endpoint = controller.restart(user_id).await?;

    println!(
        "{} Restarted sandbox for user {}.",
        "✓".green(),
        user_id.to_string().cyan()
    );
    println!("  URL:  {}", endpoint.url.green());

    Ok(())
}
