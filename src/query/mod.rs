//! Query capture and N+1 detection
//!
//! - `normalizer`: literal SQL to structural pattern + fingerprint
//! - `ledger`: ordered per-unit-of-work record of executed statements
//! - `detector`: repeated-pattern detection with span evidence
//! - `caller`: application call-site resolution

pub mod caller;
pub mod detector;
pub mod ledger;
pub mod normalizer;

pub use caller::{Caller, CallerResolver, Frame};
pub use detector::{DiagnosticRecord, N1Detector, Offender, Span, SpanEvidence, DEFAULT_THRESHOLD};
pub use ledger::{PatternCounts, QueryLedger, QueryRecord};
pub use normalizer::{fingerprint, normalize};

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One executed statement as reported by the database layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEvent {
    pub sql: String,
    #[serde(default)]
    pub bindings: Vec<Value>,
    pub duration_ms: f64,
}

impl QueryEvent {
    pub fn new(sql: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
            duration_ms,
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<Value>) -> Self {
        self.bindings = format_bindings(bindings);
        self
    }
}

/// Render bound parameters for transmission.
///
/// Timestamps are flattened to `YYYY-MM-DD HH:MM:SS`; everything else is kept as is.
pub fn format_bindings(bindings: Vec<Value>) -> Vec<Value> {
    bindings
        .into_iter()
        .map(|binding| match &binding {
            Value::String(s) => match parse_timestamp(s) {
                Some(ts) => Value::String(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
                None => binding,
            },
            _ => binding,
        })
        .collect()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()
}
