//! Unit-of-work lifecycle and payload assembly
//!
//! A [`Collector`] opens a unit when a request, command or job starts, keeps
//! it in a registry while it runs, and on completion runs N+1 detection,
//! assembles the payload and hands it to the transport.

pub mod context;
pub mod filter;
pub mod payload;
pub mod redact;
pub mod transport;
pub mod unit;

pub use context::UnitHandle;
pub use filter::PathFilter;
pub use payload::{
    DiagnosticSink, ExceptionRecord, LogEntry, OutgoingRequest, Payload, RequestInfo, UnitContext,
    UnitKind,
};
pub use redact::{FieldRedactor, Redact};
pub use transport::Transport;
pub use unit::UnitOfWork;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{validate_config, Config};
use crate::error::Result;
use crate::metrics;
use crate::query::{CallerResolver, N1Detector, QueryEvent};

/// Configuration together with everything derived from it.
///
/// Swapped as a whole on reload so readers never see a half-applied change.
pub struct Settings {
    pub config: Config,
    pub transport: Transport,
    pub path_filter: PathFilter,
    pub headers: Arc<dyn Redact>,
    pub body: Arc<dyn Redact>,
}

impl Settings {
    pub fn new(config: Config) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self {
            transport: Transport::from_config(&config)?,
            path_filter: PathFilter::from_config(&config.path_filters),
            headers: Arc::new(FieldRedactor::from_config(&config.headers)),
            body: Arc::new(FieldRedactor::from_config(&config.body)),
            config,
        })
    }

    /// Replace the header filter
    pub fn with_header_redactor(mut self, redactor: Arc<dyn Redact>) -> Self {
        self.headers = redactor;
        self
    }

    /// Replace the filter for log context and other structured data
    pub fn with_body_redactor(mut self, redactor: Arc<dyn Redact>) -> Self {
        self.body = redactor;
        self
    }
}

pub struct Collector {
    settings: ArcSwap<Settings>,
    resolver: Arc<CallerResolver>,
    units: DashMap<String, UnitHandle>,
}

impl Collector {
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::with_settings(Settings::new(config)?))
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
            resolver: Arc::new(CallerResolver::default()),
            units: DashMap::new(),
        }
    }

    pub fn with_resolver(mut self, resolver: CallerResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Apply a new configuration; units already running keep their detector.
    pub fn reload(&self, config: Config) -> Result<()> {
        let settings = Settings::new(config)?;
        info!(
            enabled = settings.config.is_active(),
            threshold = settings.config.detector.threshold,
            "Collector configuration reloaded"
        );
        self.settings.store(Arc::new(settings));
        Ok(())
    }

    /// Enabled and a token is configured
    pub fn is_enabled(&self) -> bool {
        self.settings.load().config.is_active()
    }

    /// Whether an incoming request on `path` should be collected
    pub fn should_track(&self, path: &str) -> bool {
        let settings = self.settings.load();
        settings.config.is_active() && settings.path_filter.matches(path)
    }

    pub fn is_telemetry_url(&self, url: &str) -> bool {
        self.settings.load().transport.is_telemetry_url(url)
    }

    /// Start a unit of work with a fresh, isolated ledger.
    pub fn begin(&self, kind: UnitKind, name: impl Into<String>) -> UnitHandle {
        let settings = self.settings.load();
        let detector = N1Detector::new(settings.config.detector.threshold);
        let unit = UnitOfWork::new(kind, name, detector)
            .with_resolver(self.resolver.clone(), settings.config.detector.capture_backtrace)
            .with_redactor(settings.body.clone());

        let id = unit.id().to_string();
        debug!(unit_id = %id, kind = %kind, name = %unit.name(), "Unit of work started");

        let handle = Arc::new(Mutex::new(unit));
        self.units.insert(id, handle.clone());
        handle
    }

    /// Look up an in-flight unit
    pub fn unit(&self, id: &str) -> Option<UnitHandle> {
        self.units.get(id).map(|entry| entry.value().clone())
    }

    /// Number of in-flight units
    pub fn active_units(&self) -> usize {
        self.units.len()
    }

    /// Record a query into the unit `unit_id`, attributing it to the caller.
    ///
    /// Returns `false` when no such unit is running.
    #[track_caller]
    pub fn record_query(&self, unit_id: &str, event: QueryEvent) -> bool {
        let location = Location::caller();
        match self.unit(unit_id) {
            Some(handle) => {
                context::lock(&handle).record_query(event, Some(location));
                true
            }
            None => false,
        }
    }

    /// Finish a unit: detect, assemble the payload, clear the ledger and
    /// drop the unit from the registry.
    pub fn end(&self, handle: &UnitHandle) -> Option<Payload> {
        let mut unit = context::lock(handle);
        let id = unit.id().to_string();
        let elapsed = unit.elapsed();
        let payload = unit.finish();
        drop(unit);

        self.units.remove(&id);
        debug!(
            unit_id = %id,
            elapsed_ms = elapsed.as_millis() as u64,
            collected = payload.is_some(),
            "Unit of work finished"
        );
        payload
    }

    /// Deliver a payload; disabled collectors drop it.
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        let settings = self.settings.load_full();
        if !settings.config.is_active() {
            metrics::record_payload("skipped");
            return Ok(());
        }
        settings.transport.send(payload).await
    }

    /// End the unit and deliver its payload, if any.
    ///
    /// Delivery failures are logged by the transport and never surface here.
    /// Returns true when a payload was delivered.
    pub async fn flush(&self, handle: &UnitHandle) -> bool {
        let Some(payload) = self.end(handle) else {
            return false;
        };
        if !self.is_enabled() {
            metrics::record_payload("skipped");
            return false;
        }
        self.send(&payload).await.is_ok()
    }

    /// End a unit whose owner never got to flush it (cancelled or panicked).
    ///
    /// What was collected is delivered in the background when a tokio
    /// runtime is available, and dropped otherwise.
    pub fn abandon(&self, handle: &UnitHandle) {
        let Some(payload) = self.end(handle) else {
            return;
        };
        let settings = self.settings.load_full();
        if !settings.config.is_active() {
            metrics::record_payload("skipped");
            return;
        }

        warn!(
            trace_id = %payload.trace_id,
            name = %payload.context.name,
            "Unit of work ended before completion"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let transport = settings.transport.clone();
                runtime.spawn(async move {
                    let _ = transport.send(&payload).await;
                });
            }
            Err(_) => metrics::record_payload("dropped"),
        }
    }

    /// Run `future` as its own unit of work and flush it afterwards.
    pub async fn run<F>(&self, kind: UnitKind, name: impl Into<String>, future: F) -> F::Output
    where
        F: Future,
    {
        if !self.is_enabled() {
            return future.await;
        }

        let handle = self.begin(kind, name);
        let guard = UnitGuard::new(self, handle.clone());
        let output = context::scope(handle.clone(), future).await;
        guard.disarm();
        self.flush(&handle).await;
        output
    }

    /// Run a queue job as a unit of work
    pub async fn run_job<F>(&self, name: impl Into<String>, future: F) -> F::Output
    where
        F: Future,
    {
        self.run(UnitKind::Queue, name, future).await
    }

    /// Run a CLI command as a unit of work
    pub async fn run_command<F>(&self, name: impl Into<String>, future: F) -> F::Output
    where
        F: Future,
    {
        self.run(UnitKind::Console, name, future).await
    }

    /// Run synchronous code as a unit of work.
    ///
    /// The payload is returned instead of sent; deliver it with [`Collector::send`].
    pub fn run_blocking<F, R>(&self, kind: UnitKind, name: impl Into<String>, f: F) -> (R, Option<Payload>)
    where
        F: FnOnce() -> R,
    {
        if !self.is_enabled() {
            return (f(), None);
        }

        let handle = self.begin(kind, name);
        let guard = UnitGuard::new(self, handle.clone());
        let output = context::sync_scope(handle.clone(), f);
        guard.disarm();
        (output, self.end(&handle))
    }
}

/// Abandons its unit on drop unless disarmed.
///
/// Keeps the registry from holding units whose future was cancelled or
/// whose code panicked before the unit could be flushed.
pub struct UnitGuard<'a> {
    collector: &'a Collector,
    handle: UnitHandle,
    armed: bool,
}

impl<'a> UnitGuard<'a> {
    pub fn new(collector: &'a Collector, handle: UnitHandle) -> Self {
        Self {
            collector,
            handle,
            armed: true,
        }
    }

    /// The unit completed normally; its owner ends it.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.collector.abandon(&self.handle);
        }
    }
}

/// Record a query into the current task's unit of work.
///
/// Returns `false` outside any unit.
#[track_caller]
pub fn record_query(event: QueryEvent) -> bool {
    let location = Location::caller();
    context::with_current(|unit| unit.record_query(event, Some(location))).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(token: &str) -> Config {
        Config {
            token: token.to_string(),
            endpoint: "http://127.0.0.1:9/ingest".to_string(),
            ..Config::default()
        }
    }

    fn n1_queries(count: usize) {
        for id in 0..count {
            record_query(QueryEvent::new(format!("SELECT * FROM users WHERE id = {id}"), 1.0));
        }
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut cfg = config("tok");
        cfg.detector.threshold = 0;
        assert!(Collector::new(cfg).is_err());
    }

    #[test]
    fn test_begin_and_end_maintain_registry() {
        let collector = Collector::new(config("tok")).unwrap();
        let first = collector.begin(UnitKind::Http, "api/users");
        let second = collector.begin(UnitKind::Queue, "SendMail");
        assert_eq!(collector.active_units(), 2);

        let id = context::lock(&first).id().to_string();
        assert!(collector.unit(&id).is_some());

        assert!(collector.end(&first).is_none());
        assert!(collector.unit(&id).is_none());
        assert_eq!(collector.active_units(), 1);

        collector.end(&second);
        assert_eq!(collector.active_units(), 0);
    }

    #[test]
    fn test_record_query_by_unit_id() {
        let collector = Collector::new(config("tok")).unwrap();
        let handle = collector.begin(UnitKind::Console, "import");
        let id = context::lock(&handle).id().to_string();

        for n in 0..3 {
            assert!(collector.record_query(&id, QueryEvent::new(format!("SELECT * FROM t WHERE id = {n}"), 2.0)));
        }
        assert!(!collector.record_query("missing", QueryEvent::new("SELECT 1", 1.0)));

        let queries = context::lock(&handle).ledger().queries().to_vec();
        assert_eq!(queries.len(), 3);
        assert!(queries[0].caller_file.as_deref().unwrap_or_default().ends_with("mod.rs"));

        let payload = collector.end(&handle).unwrap();
        assert_eq!(payload.queries.len(), 1);
        assert_eq!(payload.queries[0].duplicate_count, 3);
    }

    #[test]
    fn test_run_blocking_scopes_free_record_query() {
        let collector = Collector::new(config("tok")).unwrap();

        let (value, payload) = collector.run_blocking(UnitKind::Console, "report", || {
            n1_queries(4);
            "done"
        });

        assert_eq!(value, "done");
        let payload = payload.unwrap();
        assert_eq!(payload.context.name, "report");
        assert_eq!(payload.queries[0].duplicate_count, 4);
        assert!(!record_query(QueryEvent::new("SELECT 1", 1.0)), "no unit outside the scope");
    }

    #[test]
    fn test_threshold_follows_reload() {
        let collector = Collector::new(config("tok")).unwrap();
        let mut cfg = config("tok");
        cfg.detector.threshold = 5;
        collector.reload(cfg).unwrap();

        let (_, payload) = collector.run_blocking(UnitKind::Console, "report", || n1_queries(4));
        assert!(payload.is_none(), "4 repetitions stay below a threshold of 5");
    }

    #[test]
    fn test_should_track() {
        let collector = Collector::new(config("tok")).unwrap();
        assert!(collector.should_track("/api/users"));
        assert!(!collector.should_track("/api/health"));
        assert!(!collector.should_track("/"));

        let disabled = Collector::new(config("")).unwrap();
        assert!(!disabled.is_enabled());
        assert!(!disabled.should_track("/api/users"));
    }

    #[tokio::test]
    async fn test_run_skips_collection_when_disabled() {
        let collector = Collector::new(config("")).unwrap();
        let recorded = collector
            .run_job("SyncUsers", async { record_query(QueryEvent::new("SELECT 1", 1.0)) })
            .await;
        assert!(!recorded);
        assert_eq!(collector.active_units(), 0);
    }

    #[test]
    fn test_run_blocking_skips_collection_when_disabled() {
        let collector = Collector::new(config("")).unwrap();
        let (recorded, payload) = collector.run_blocking(UnitKind::Console, "report", || {
            n1_queries(4);
            record_query(QueryEvent::new("SELECT 1", 1.0))
        });
        assert!(!recorded);
        assert!(payload.is_none());
        assert_eq!(collector.active_units(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_jobs_leave_the_registry() {
        let collector = Collector::new(config("tok")).unwrap();

        for _ in 0..3 {
            let job = collector.run_job("Slow", async {
                n1_queries(3);
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            });
            let result = tokio::time::timeout(std::time::Duration::from_millis(10), job).await;
            assert!(result.is_err());
        }

        assert_eq!(collector.active_units(), 0);
    }

    #[test]
    fn test_panicking_unit_leaves_the_registry() {
        let collector = Collector::new(config("tok")).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            collector.run_blocking(UnitKind::Console, "explode", || {
                n1_queries(3);
                panic!("handler failed");
            })
        }));
        assert!(result.is_err());
        assert_eq!(collector.active_units(), 0);
    }

    #[test]
    fn test_log_context_uses_custom_body_redactor() {
        use tracing_subscriber::prelude::*;

        #[derive(Debug)]
        struct DropAll;

        impl Redact for DropAll {
            fn redact(&self, _value: serde_json::Value) -> serde_json::Value {
                serde_json::Value::Object(serde_json::Map::new())
            }
        }

        let settings = Settings::new(config("tok"))
            .unwrap()
            .with_body_redactor(Arc::new(DropAll));
        let collector = Collector::with_settings(settings);
        let subscriber = tracing_subscriber::registry()
            .with(crate::capture::CaptureLayer::new(tracing::Level::INFO));

        let (_, payload) = tracing::subscriber::with_default(subscriber, || {
            collector.run_blocking(UnitKind::Console, "billing", || {
                tracing::info!(target: "app::billing", secret_field = "leak", "Charged card");
            })
        });

        let payload = payload.unwrap();
        assert_eq!(payload.logs.len(), 1);
        assert_eq!(payload.logs[0].message, "Charged card");
        assert!(payload.logs[0].context.is_empty());
    }

    #[tokio::test]
    async fn test_send_is_noop_when_disabled() {
        let collector = Collector::new(config("")).unwrap();
        let payload = Payload::new("t", UnitKind::Console, "x");
        assert!(collector.send(&payload).await.is_ok());
    }
}
