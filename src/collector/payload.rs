//! Telemetry payload assembled for one unit of work

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::query::DiagnosticRecord;

/// Kind of unit of work a payload describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Incoming HTTP request
    Http,
    /// CLI command invocation
    Console,
    /// Queue job execution
    Queue,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Console => "console",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitContext {
    pub kind: UnitKind,
    /// Route path, command name or job name
    pub name: String,
}

/// Metadata of the incoming request that triggered the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub status_code: Option<u16>,
    pub duration_ms: u64,
}

/// One captured log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    /// tracing target
    pub channel: String,
    /// Module path of the emitting code
    pub source: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// One outgoing HTTP call made while the unit was active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_headers: serde_json::Map<String, serde_json::Value>,
    pub duration_ms: f64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Error or panic reported during the unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    /// Type name when known (`panic` for panics)
    pub class: Option<String>,
    pub message: String,
    /// Messages of the `source()` chain, outermost first
    #[serde(default)]
    pub chain: Vec<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Receiver of finalized N+1 findings
pub trait DiagnosticSink {
    fn accept(&mut self, record: DiagnosticRecord);
}

impl DiagnosticSink for Vec<DiagnosticRecord> {
    fn accept(&mut self, record: DiagnosticRecord) {
        self.push(record);
    }
}

/// Document posted to the ingestion endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub trace_id: String,
    pub context: UnitContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<DiagnosticRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outgoing_requests: Vec<OutgoingRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionRecord>,
}

impl Payload {
    pub fn new(trace_id: impl Into<String>, kind: UnitKind, name: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            context: UnitContext {
                kind,
                name: name.into(),
            },
            request: None,
            logs: Vec::new(),
            queries: Vec::new(),
            outgoing_requests: Vec::new(),
            exception: None,
        }
    }

    /// True when there is nothing worth sending
    pub fn is_empty(&self) -> bool {
        self.request.is_none()
            && self.logs.is_empty()
            && self.queries.is_empty()
            && self.outgoing_requests.is_empty()
            && self.exception.is_none()
    }
}

impl DiagnosticSink for Payload {
    fn accept(&mut self, record: DiagnosticRecord) {
        self.queries.push(record);
    }
}
