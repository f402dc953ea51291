use anyhow::Result;
use colored::Colorize;

pub async fn run(user_id: i64) -> Result<()> {
    let controller = super::build_controller()?;
    controller.stop(user_id).await?;

    println!(
        "{} Stopped sandbox for user {} and released its port.",
        "✓".green(),
        user_id.to_string().cyan()
    );

    Ok(())
}
