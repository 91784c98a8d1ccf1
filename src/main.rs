use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use querylens::logging;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config_path = args.config.as_deref();

    let (cfg, load_error) = commands::config::load_or_default(config_path);
    logging::init_tracing(&cfg);
    if let Some(e) = load_error {
        warn!(error = %e, "Failed to load configuration, using defaults");
    }
    querylens::metrics::describe_metrics();

    match args.command {
        cli::Commands::Analyze {
            file,
            threshold,
            json,
            send,
        } => {
            commands::analyze::execute(config_path, file, threshold, json, send).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(config_path)?,
            cli::ConfigCommands::Validate => commands::config::validate(config_path)?,
        },
        cli::Commands::Version => {
            println!("querylens v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
