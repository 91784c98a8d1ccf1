//! One unit of work: an HTTP request, a CLI command or a queue job

use std::panic::Location;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::payload::{
    DiagnosticSink, ExceptionRecord, LogEntry, OutgoingRequest, Payload, RequestInfo, UnitKind,
};
use super::redact::{FieldRedactor, Redact};
use crate::metrics;
use crate::query::{Caller, CallerResolver, N1Detector, QueryEvent, QueryLedger};

/// Everything collected while one unit of work runs.
///
/// Each unit owns its own ledger, so concurrent requests or jobs never see
/// each other's queries.
#[derive(Debug)]
pub struct UnitOfWork {
    id: String,
    kind: UnitKind,
    name: String,
    started_at: Instant,
    ledger: QueryLedger,
    detector: N1Detector,
    resolver: Arc<CallerResolver>,
    capture_backtrace: bool,
    redactor: Arc<dyn Redact>,
    payload: Payload,
}

impl UnitOfWork {
    pub fn new(kind: UnitKind, name: impl Into<String>, detector: N1Detector) -> Self {
        let id = Uuid::now_v7().to_string();
        let name = name.into();
        Self {
            payload: Payload::new(id.clone(), kind, name.clone()),
            id,
            kind,
            name,
            started_at: Instant::now(),
            ledger: QueryLedger::new(),
            detector,
            resolver: Arc::new(CallerResolver::default()),
            capture_backtrace: false,
            redactor: Arc::new(FieldRedactor::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<CallerResolver>, capture_backtrace: bool) -> Self {
        self.resolver = resolver;
        self.capture_backtrace = capture_backtrace;
        self
    }

    /// Filter applied to log context before it is stored
    pub fn with_redactor(mut self, redactor: Arc<dyn Redact>) -> Self {
        self.redactor = redactor;
        self
    }

    /// Identifier of the unit, also used as the payload trace id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn ledger(&self) -> &QueryLedger {
        &self.ledger
    }

    /// Append a query with an already resolved call site.
    pub fn log_query(&mut self, event: QueryEvent, caller: Caller) {
        metrics::record_query(self.kind.as_str());
        self.ledger.log(event, caller);
    }

    /// Append a query, resolving the call site from `location` (or the backtrace when enabled).
    pub fn record_query(&mut self, event: QueryEvent, location: Option<&Location<'_>>) {
        let caller = match location {
            Some(location) => self.resolver.capture(location, self.capture_backtrace),
            None if self.capture_backtrace => self.resolver.capture_backtrace(),
            None => Caller::unknown(),
        };
        self.log_query(event, caller);
    }

    pub fn add_log(&mut self, mut entry: LogEntry) {
        entry.context = self.redactor.redact_map(std::mem::take(&mut entry.context));
        self.payload.logs.push(entry);
    }

    pub fn add_outgoing_request(&mut self, request: OutgoingRequest) {
        self.payload.outgoing_requests.push(request);
    }

    /// Record an error; a later one replaces an earlier one.
    pub fn set_exception(&mut self, exception: ExceptionRecord) {
        self.payload.exception = Some(exception);
    }

    pub fn set_request(&mut self, request: RequestInfo) {
        self.payload.request = Some(request);
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Run N+1 detection, hand every finding to `sink`, then clear the ledger.
    ///
    /// Returns the number of findings.
    pub fn flush_diagnostics<S>(&mut self, sink: &mut S) -> usize
    where
        S: DiagnosticSink + ?Sized,
    {
        let records = self.detector.detect(&self.ledger);
        let count = records.len();
        metrics::record_n1_patterns(self.kind.as_str(), count as u64);
        for record in records {
            sink.accept(record);
        }
        self.ledger.clear();
        count
    }

    /// Close the unit and take its payload.
    ///
    /// Returns `None` when nothing was collected. The unit is left empty and
    /// can be reused; a fresh trace id is allocated for what comes next.
    pub fn finish(&mut self) -> Option<Payload> {
        let next_id = Uuid::now_v7().to_string();
        let fresh = Payload::new(next_id.clone(), self.kind, self.name.clone());
        let mut payload = std::mem::replace(&mut self.payload, fresh);
        self.id = next_id;

        self.flush_diagnostics(&mut payload);
        self.started_at = Instant::now();

        if payload.is_empty() {
            None
        } else {
            Some(payload)
        }
    }
}
