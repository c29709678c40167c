use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use erp_sync::cli::args::{Cli, Commands};
use erp_sync::cli::commands;
use erp_sync::error::SyncError;
use erp_sync::sync::SyncService;

#[tokio::main]
async fn main() {
    if let Err(e) = init_logging() {
        eprintln!("{}: {e}", "warning".yellow().bold());
    }

    if let Err(e) = run().await {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("erp_sync=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .try_init()?;

    Ok(())
}

fn service(cli: &Cli) -> Result<SyncService, SyncError> {
    SyncService::from_config(commands::load_config(cli)?)
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();
    let format = cli.output;

    let output = match cli.command.clone() {
        Commands::Init => commands::init(&cli, format)?,
        Commands::Status => commands::status(&service(&cli)?, format).await?,
        Commands::Sync => commands::sync(&service(&cli)?, format).await?,
        Commands::Download => commands::download(&service(&cli)?, format).await?,
        Commands::Queue(args) => commands::queue(&service(&cli)?, args.command, format).await?,
        Commands::Run => commands::run(&service(&cli)?).await?,
    };

    if !output.is_empty() {
        println!("{output}");
    }

    Ok(())
}
