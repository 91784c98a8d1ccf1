use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "querylens", version, about = "N+1 query detection and telemetry collection")]
pub struct Cli {
    /// Configuration file path (defaults to ./querylens.toml when present)
    #[arg(short, long, global = true, env = "QUERYLENS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run N+1 detection over a JSON-lines query log
    Analyze {
        /// File with one query event per line (`-` reads stdin)
        file: PathBuf,

        /// Repetitions at or above this count are reported (overrides config)
        #[arg(short, long)]
        threshold: Option<usize>,

        /// Print the assembled payload as JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Deliver the payload to the configured ingestion endpoint
        #[arg(long)]
        send: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display effective configuration (with the token masked)
    Show,

    /// Validate configuration
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_analyze() {
        let args = vec!["querylens", "analyze", "queries.jsonl", "--threshold", "5", "--json"];
        let cli = Cli::try_parse_from(args).unwrap();

        match cli.command {
            Commands::Analyze {
                file,
                threshold,
                json,
                send,
            } => {
                assert_eq!(file, PathBuf::from("queries.jsonl"));
                assert_eq!(threshold, Some(5));
                assert!(json);
                assert!(!send);
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_cli_parsing_global_config() {
        let args = vec!["querylens", "config", "show", "--config", "custom.toml"];
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigCommands::Show
            }
        ));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(vec!["querylens"]).is_err());
    }
}
