//! Tracing layer attaching log lines and sqlx queries to the current unit

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::collector::context;
use crate::collector::LogEntry;
use crate::config::Config;
use crate::query::QueryEvent;

/// Target of the statement events emitted by sqlx
pub const SQLX_QUERY_TARGET: &str = "sqlx::query";

/// Captures tracing events into the unit of work of the emitting task.
///
/// Events outside any unit are ignored. The collector's own events are never
/// captured, otherwise delivering a payload could feed back into the next one.
/// Field values are redacted by the receiving unit with its collector's body
/// filter.
pub struct CaptureLayer {
    max_level: Level,
    bridge_sqlx: bool,
}

impl CaptureLayer {
    pub fn new(max_level: Level) -> Self {
        Self {
            max_level,
            bridge_sqlx: true,
        }
    }

    /// Capture level from `logging.capture_level`
    pub fn from_config(config: &Config) -> Self {
        let level = config
            .logging
            .capture_level
            .parse()
            .unwrap_or(Level::DEBUG);
        Self::new(level)
    }

    /// Turn statement events on `sqlx::query` into ledger entries (on by default)
    pub fn with_sqlx_bridge(mut self, enabled: bool) -> Self {
        self.bridge_sqlx = enabled;
        self
    }

    fn capture_query(&self, visitor: FieldVisitor) {
        let Some(sql) = visitor.statement else {
            return;
        };
        let duration_ms = visitor.elapsed_secs.map(|s| s * 1000.0).unwrap_or_default();
        let event = QueryEvent::new(sql.trim(), duration_ms);

        context::try_with_current(|unit| unit.record_query(event, None));
    }

    fn capture_log(&self, event: &Event<'_>, visitor: FieldVisitor) {
        let metadata = event.metadata();
        let entry = LogEntry {
            level: metadata.level().to_string(),
            message: visitor.message.unwrap_or_default(),
            context: visitor.fields,
            timestamp: Utc::now(),
            channel: metadata.target().to_string(),
            source: metadata.module_path().map(str::to_string),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
        };

        context::try_with_current(|unit| unit.add_log(entry));
    }
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();

        if is_own_target(target) || context::current().is_none() {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if self.bridge_sqlx && target == SQLX_QUERY_TARGET && visitor.statement.is_some() {
            self.capture_query(visitor);
        } else if *metadata.level() <= self.max_level {
            self.capture_log(event, visitor);
        }
    }
}

fn is_own_target(target: &str) -> bool {
    let own = env!("CARGO_CRATE_NAME");
    target == own
        || target
            .strip_prefix(own)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// Collects event fields as JSON
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    statement: Option<String>,
    elapsed_secs: Option<f64>,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, name: &str, value: Value) {
        self.fields.insert(name.to_string(), value);
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let value_str = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(value_str),
            "db.statement" => self.statement = Some(value_str.trim_matches('"').to_string()),
            name => self.insert(name, Value::String(value_str)),
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "db.statement" => self.statement = Some(value.to_string()),
            name => self.insert(name, Value::String(value.to_string())),
        }
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        if field.name() == "elapsed_secs" {
            self.elapsed_secs = Some(value);
        }
        self.insert(
            field.name(),
            serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number),
        );
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field.name(), Value::from(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field.name(), Value::from(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field.name(), Value::Bool(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FieldRedactor, UnitKind, UnitOfWork};
    use crate::query::{Caller, N1Detector};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::prelude::*;

    fn layer() -> CaptureLayer {
        CaptureLayer::new(Level::INFO)
    }

    fn unit() -> context::UnitHandle {
        let unit = UnitOfWork::new(UnitKind::Console, "test", N1Detector::default())
            .with_redactor(Arc::new(FieldRedactor::new(["password"], ["email"])));
        Arc::new(Mutex::new(unit))
    }

    #[test]
    fn test_captures_logs_with_redacted_context() {
        let subscriber = tracing_subscriber::registry().with(layer());
        let handle = unit();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(handle.clone(), || {
                tracing::info!(target: "app::signup", user_id = 7, email = "a@b.c", password = "x", "User signed up");
                tracing::debug!(target: "app::signup", "below capture level");
            });
            tracing::warn!(target: "app::signup", "outside any unit");
        });

        let unit = context::lock(&handle);
        let logs = &unit.payload().logs;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, "INFO");
        assert_eq!(logs[0].message, "User signed up");
        assert_eq!(logs[0].channel, "app::signup");
        assert_eq!(logs[0].context["user_id"], 7);
        assert_eq!(logs[0].context["email"], crate::collector::redact::MASK_VALUE);
        assert!(logs[0].context.get("password").is_none());
    }

    #[test]
    fn test_bridges_sqlx_statements_into_ledger() {
        let subscriber = tracing_subscriber::registry().with(layer());
        let handle = unit();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(handle.clone(), || {
                for id in 1..=3 {
                    let sql = format!("SELECT * FROM users WHERE id = {id}");
                    tracing::info!(
                        target: "sqlx::query",
                        summary = "SELECT * FROM users …",
                        db.statement = sql.as_str(),
                        rows_returned = 1u64,
                        elapsed_secs = 0.002,
                    );
                }
            });
        });

        let unit = context::lock(&handle);
        assert!(unit.payload().logs.is_empty(), "statements are not log lines");
        let queries = unit.ledger().queries();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].sql, "SELECT * FROM users WHERE id = 1");
        assert!((queries[0].duration_ms - 2.0).abs() < 1e-9);
        assert_eq!(unit.ledger().count_of(&queries[0].fingerprint), 3);
    }

    #[test]
    fn test_ignores_own_events() {
        let subscriber = tracing_subscriber::registry().with(layer());
        let handle = unit();

        tracing::subscriber::with_default(subscriber, || {
            context::sync_scope(handle.clone(), || {
                tracing::warn!(target: env!("CARGO_CRATE_NAME"), "internal");
                tracing::warn!("emitted from this module");
            });
        });

        assert!(context::lock(&handle).payload().logs.is_empty());
    }

    #[test]
    fn test_is_own_target() {
        let own = env!("CARGO_CRATE_NAME");
        assert!(is_own_target(own));
        assert!(is_own_target(&format!("{own}::collector")));
        assert!(!is_own_target(&format!("{own}_extras")));
        assert!(!is_own_target("sqlx::query"));
    }

    #[test]
    fn test_from_config_uses_capture_level() {
        let mut config = Config::default();
        config.logging.capture_level = "warn".to_string();
        assert_eq!(CaptureLayer::from_config(&config).max_level, Level::WARN);
    }

    #[test]
    fn test_caller_unknown_for_bridged_queries() {
        let handle = unit();
        context::sync_scope(handle.clone(), || {
            layer().capture_query(FieldVisitor {
                statement: Some("SELECT 1".to_string()),
                ..FieldVisitor::default()
            });
        });
        let unit = context::lock(&handle);
        assert_eq!(unit.ledger().queries()[0].caller_file, Caller::unknown().file);
    }
}
