use anyhow::Result;
use colored::Colorize;

pub async fn run(user_id: i64) -> Result<()> {
    let controller = super::build_controller()?;
    let port = controller.ensure_port_assigned(user_id)?;

    println!(
        "{} Port {} is leased to user {}.",
        "✓".green(),
        port.to_string().cyan(),
        user_id.to_string().cyan()
    );

    Ok(())
}
