use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Environment prefix for overrides, e.g. `QUERYLENS_TOKEN`, `QUERYLENS_DETECTOR__THRESHOLD`
pub const ENV_PREFIX: &str = "QUERYLENS";

/// Default config file looked up next to the process
pub const DEFAULT_CONFIG_FILE: &str = "querylens.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Bearer token for the ingestion endpoint; nothing is sent while empty
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub path_filters: PathFilterConfig,

    #[serde(default = "default_headers")]
    pub headers: RedactionConfig,

    #[serde(default = "default_body")]
    pub body: RedactionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            token: String::new(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
            detector: DetectorConfig::default(),
            path_filters: PathFilterConfig::default(),
            headers: default_headers(),
            body: default_body(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Collection is active only when enabled and a token is configured
    pub fn is_active(&self) -> bool {
        self.enabled && !self.token.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectorConfig {
    /// Repetitions at or above this count are reported as N+1
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Walk the full backtrace to find the query call site (slow)
    #[serde(default)]
    pub capture_backtrace: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            capture_backtrace: false,
        }
    }
}

/// Glob filters on the request path (without leading slash)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathFilterConfig {
    #[serde(default = "default_include_paths")]
    pub include: Vec<String>,
    #[serde(default = "default_exclude_paths")]
    pub exclude: Vec<String>,
}

impl Default for PathFilterConfig {
    fn default() -> Self {
        Self {
            include: default_include_paths(),
            exclude: default_exclude_paths(),
        }
    }
}

/// Field names (case-insensitive) removed or masked before transmission
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub mask: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Console log level (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Minimum level of log lines attached to payloads
    #[serde(default = "default_capture_level")]
    pub capture_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            capture_level: default_capture_level(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://telemetry.querylens.dev/api/v1/telemetry".to_string()
}

fn default_timeout_seconds() -> u64 {
    5
}

fn default_threshold() -> usize {
    crate::query::DEFAULT_THRESHOLD
}

fn default_include_paths() -> Vec<String> {
    vec!["api/*".to_string()]
}

fn default_exclude_paths() -> Vec<String> {
    vec!["api/health".to_string(), "api/ping".to_string()]
}

fn default_headers() -> RedactionConfig {
    RedactionConfig {
        exclude: to_strings(&[
            "authorization",
            "x-api-key",
            "cookie",
            "set-cookie",
            "x-auth-token",
            "x-access-token",
            "x-refresh-token",
            "x-secret",
            "x-private-key",
            "authentication",
        ]),
        mask: Vec::new(),
    }
}

fn default_body() -> RedactionConfig {
    RedactionConfig {
        exclude: to_strings(&[
            "password",
            "password_confirmation",
            "token",
            "access_token",
            "refresh_token",
            "api_key",
            "secret",
            "private_key",
            "authorization",
            "credit_card",
            "card_number",
            "cvv",
            "pin",
            "otp",
        ]),
        mask: to_strings(&[
            "ssn",
            "social_security",
            "phone",
            "email",
            "address",
            "postal_code",
            "zip_code",
        ]),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_capture_level() -> String {
    "debug".to_string()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Load configuration from `path` (optional file) and `QUERYLENS_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    let settings = config::Config::builder()
        .add_source(config::File::from(file).required(path.is_some()))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("path_filters.include")
                .with_list_parse_key("path_filters.exclude")
                .try_parsing(true),
        )
        .build()?;

    let cfg: Config = settings.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.detector.threshold < 1 {
        return Err(Error::InvalidConfig(
            "detector.threshold must be at least 1".to_string(),
        ));
    }

    if cfg.timeout_seconds == 0 {
        return Err(Error::InvalidConfig(
            "timeout_seconds must be greater than 0".to_string(),
        ));
    }

    let endpoint = url::Url::parse(&cfg.endpoint)
        .map_err(|e| Error::InvalidConfig(format!("endpoint '{}' is not a valid URL: {}", cfg.endpoint, e)))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(Error::InvalidConfig(format!(
            "endpoint scheme must be http or https, got '{}'",
            endpoint.scheme()
        )));
    }

    for level in [&cfg.logging.level, &cfg.logging.capture_level] {
        if level.parse::<tracing::Level>().is_err() {
            return Err(Error::InvalidConfig(format!("invalid log level '{}'", level)));
        }
    }

    if !matches!(cfg.logging.format.as_str(), "text" | "json") {
        return Err(Error::InvalidConfig(format!(
            "logging.format must be 'text' or 'json', got '{}'",
            cfg.logging.format
        )));
    }

    Ok(())
}
