//! Tracing setup and log-safe secret rendering

use std::fmt;
use tracing::Subscriber;
use tracing_subscriber::{fmt as fmt_layer, prelude::*, registry::LookupSpan, EnvFilter};

use crate::capture::CaptureLayer;
use crate::config::Config;

/// Token rendered for logs and config dumps.
///
/// Only the first 8 characters are shown; shorter tokens are hidden entirely.
#[derive(Clone, Debug)]
pub struct MaskedToken<'a> {
    inner: &'a str,
}

impl<'a> MaskedToken<'a> {
    /// ```
    /// use querylens::logging::MaskedToken;
    ///
    /// let token = "ql_live_0123456789abcdef";
    /// assert_eq!(MaskedToken::new(token).to_string(), "ql_live_***");
    /// ```
    pub fn new(token: &'a str) -> Self {
        Self { inner: token }
    }
}

impl fmt::Display for MaskedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const VISIBLE: usize = 8;
        match self.inner.char_indices().nth(VISIBLE) {
            Some((end, _)) => write!(f, "{}***", &self.inner[..end]),
            None if self.inner.is_empty() => Ok(()),
            None => write!(f, "***"),
        }
    }
}

/// Initialize tracing with console output and payload capture.
///
/// `RUST_LOG` overrides the configured console level. Captured log lines are
/// filtered separately by `logging.capture_level`, so debug lines can reach
/// payloads while the console stays at `info`.
///
/// Can only succeed once per process; later calls print a warning and keep
/// the existing subscriber.
pub fn init_tracing(config: &Config) {
    let result = tracing_subscriber::registry()
        .with(console_layer(config))
        .with(CaptureLayer::from_config(config))
        .try_init();

    if let Err(e) = result {
        eprintln!("Warning: Failed to initialize tracing: {}", e);
    }
}

/// Text or JSON console output, filtered by `RUST_LOG` or `logging.level`
fn console_layer<S>(config: &Config) -> impl tracing_subscriber::Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let json = config.logging.format == "json";
    let text_output = (!json).then(|| fmt_layer::layer().with_target(true));
    let json_output = json.then(|| fmt_layer::layer().json().with_target(true));
    tracing_subscriber::Layer::and_then(text_output, json_output).with_filter(console_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_token_display() {
        assert_eq!(MaskedToken::new("ql_live_0123456789").to_string(), "ql_live_***");
        assert_eq!(MaskedToken::new("short").to_string(), "***");
        assert_eq!(MaskedToken::new("exactly8").to_string(), "***");
        assert_eq!(MaskedToken::new("").to_string(), "");
    }

    #[test]
    fn test_init_tracing_twice_does_not_panic() {
        let config = Config::default();
        init_tracing(&config);
        init_tracing(&config);
    }

    #[test]
    fn test_console_layer_for_each_format() {
        for format in ["text", "json"] {
            let mut config = Config::default();
            config.logging.format = format.to_string();

            let subscriber = tracing_subscriber::registry().with(console_layer(&config));
            tracing::subscriber::with_default(subscriber, || {
                tracing::info!(format, "console output");
            });
        }
    }
}
