//! Main entry point for the racing-backfill CLI

use clap::Parser;
use racing_backfill::cli::{Cli, Commands};
use racing_backfill::shutdown::{install_ctrl_c_handler, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("racing_backfill=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    install_ctrl_c_handler(shutdown.clone());

    let result = match &cli.command {
        Commands::Backfill(args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Coverage(args) => args
            .execute(&cli)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Errors(args) => args.execute(&cli).map(|_| ()).map_err(|e| anyhow::anyhow!(e)),
        Commands::Status(args) => args.execute(&cli).map(|_| ()).map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
