use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod lifecycle;
mod ports;
mod reclaim;
mod store;
mod workspace;

#[derive(Parser)]
#[command(name = "devcell")]
#[command(
    author,
    version,
    about = "Per-user development sandbox lifecycle and port allocation manager"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or replace) a user's sandbox
    Start {
        /// User id the sandbox belongs to (may be negative for demo identities)
        #[arg(allow_hyphen_values = true)]
        user_id: i64,
    },

    /// Stop a user's sandbox and release its port
    Stop {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,
    },

    /// Restart a user's sandbox, force-removing it if stuck
    Restart {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,
    },

    /// Show ground-truth status for a user's sandbox
    Status {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,

        /// Emit the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// List all sandbox containers on this host
    List {
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print recent output from a user's sandbox container
    Logs {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,

        /// Number of lines from the end of the log
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },

    /// Lease (or show) the user's assigned port without starting anything
    Port {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,
    },

    /// Schedule the logout-grace cleanup check for a user and wait for it
    Logout {
        #[arg(allow_hyphen_values = true)]
        user_id: i64,
    },

    /// Run a reclamation sweep
    Sweep {
        #[command(subcommand)]
        action: commands::sweep::SweepAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("devcell=debug")
    } else {
        EnvFilter::new("devcell=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Start { user_id } => {
            commands::start::run(user_id).await?;
        }
        Commands::Stop { user_id } => {
            commands::stop::run(user_id).await?;
        }
        Commands::Restart { user_id } => {
            commands::restart::run(user_id).await?;
        }
        Commands::Status { user_id, json } => {
            commands::status::run(user_id, json).await?;
        }
        Commands::List { json } => {
            commands::list::run(json).await?;
        }
        Commands::Logs { user_id, tail } => {
            commands::logs::run(user_id, tail).await?;
        }
        Commands::Port { user_id } => {
            commands::port::run(user_id).await?;
        }
        Commands::Logout { user_id } => {
            commands::logout::run(user_id).await?;
        }
        Commands::Sweep { action } => {
            commands::sweep::run(action).await?;
        }
    }

    Ok(())
}
