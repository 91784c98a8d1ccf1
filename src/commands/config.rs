use anyhow::Result;
use colored::Colorize;
use querylens::config::{self, Config};
use querylens::logging::MaskedToken;
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration with the token masked
pub fn show(path: Option<&Path>) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
pub fn validate(path: Option<&Path>) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration");

    let cfg = config::load_config(path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Collection: {}", collection_status(&cfg));
    println!("  Endpoint: {}", cfg.endpoint);
    println!("  N+1 Threshold: {}", cfg.detector.threshold);
    println!(
        "  Path Filters: {} include, {} exclude",
        cfg.path_filters.include.len(),
        cfg.path_filters.exclude.len()
    );

    Ok(())
}

/// Configuration for startup, falling back to defaults when loading fails.
///
/// The load error is handed back so it can be logged once tracing is up.
pub fn load_or_default(path: Option<&Path>) -> (Config, Option<querylens::Error>) {
    match config::load_config(path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    }
}

fn sanitize_secrets(cfg: &Config) -> Config {
    let mut sanitized = cfg.clone();
    sanitized.token = MaskedToken::new(&cfg.token).to_string();
    sanitized
}

fn collection_status(cfg: &Config) -> &'static str {
    match (cfg.enabled, cfg.token.is_empty()) {
        (false, _) => "disabled",
        (true, true) => "inactive (no token)",
        (true, false) => "active",
    }
}
