use anyhow::Result;
use colored::Colorize;

pub async fn run(user_id: i64, tail: usize) -> Result<()> {
    let controller = super::build_controller()?;
    let logs = controller.logs(user_id, tail).await?;

    if logs.is_empty() {
        println!("{} No output from sandbox for user {}.", "ℹ".blue(), user_id);
        return Ok(());
    }
    print!("{logs}");
    if !logs.ends_with('\n') {
        println!();
    }

    Ok(())
}
