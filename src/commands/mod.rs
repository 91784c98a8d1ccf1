//! Command implementations for the CLI
//!
//! - analyze: N+1 detection over a recorded query log
//! - config: Configuration display and validation

pub mod analyze;
pub mod config;
