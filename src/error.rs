use thiserror::Error;

/// Errors raised by the collector's outer surfaces (config, transport).
///
/// Query capture and N+1 detection never fail; these errors only come from
/// loading configuration and shipping payloads, and the collector logs them
/// instead of handing them to the host application.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration source could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration parsed but is semantically invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payload delivery failed before a response arrived
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Ingestion endpoint answered with a non-success status
    #[error("Ingestion endpoint returned {status}: {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short machine-readable name, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Transport(_) => "transport_error",
            Self::Rejected { .. } => "rejected",
            Self::Serialization(_) => "serialization_error",
            Self::Io(_) => "io_error",
        }
    }
}
