//! Error and panic reporting into the current unit

use chrono::Utc;
use std::error::Error as StdError;
use std::panic::{self, Location};

use crate::collector::{context, ExceptionRecord};

/// Record `error` and its `source()` chain into the current unit of work.
///
/// Returns `false` outside any unit.
#[track_caller]
pub fn capture_error<E>(error: &E) -> bool
where
    E: StdError + ?Sized,
{
    let location = Location::caller();
    let record = exception_record(error, type_name_of::<E>(), location);
    context::with_current(|unit| unit.set_exception(record)).is_some()
}

fn exception_record<E>(error: &E, class: Option<String>, location: &Location<'_>) -> ExceptionRecord
where
    E: StdError + ?Sized,
{
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }

    ExceptionRecord {
        class,
        message: error.to_string(),
        chain,
        file: Some(location.file().to_string()),
        line: Some(location.line()),
        occurred_at: Utc::now(),
    }
}

/// Concrete type name; trait objects carry no useful name.
fn type_name_of<E: ?Sized>() -> Option<String> {
    let name = std::any::type_name::<E>();
    if name.starts_with("dyn ") {
        None
    } else {
        Some(name.to_string())
    }
}

/// Install a panic hook recording panics into the current unit.
///
/// The previously installed hook still runs afterwards.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());

        let record = ExceptionRecord {
            class: Some("panic".to_string()),
            message,
            chain: Vec::new(),
            file: info.location().map(|l| l.file().to_string()),
            line: info.location().map(|l| l.line()),
            occurred_at: Utc::now(),
        };
        context::try_with_current(|unit| unit.set_exception(record));

        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{UnitKind, UnitOfWork};
    use crate::query::N1Detector;
    use std::fmt;
    use std::sync::{Arc, Mutex};

    #[derive(Debug)]
    struct QueryFailed {
        source: std::io::Error,
    }

    impl fmt::Display for QueryFailed {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "query failed")
        }
    }

    impl StdError for QueryFailed {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.source)
        }
    }

    fn unit() -> context::UnitHandle {
        Arc::new(Mutex::new(UnitOfWork::new(
            UnitKind::Http,
            "api/orders",
            N1Detector::default(),
        )))
    }

    #[test]
    fn test_capture_error_records_chain_and_location() {
        let handle = unit();
        let error = QueryFailed {
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timed out"),
        };

        let line = line!() + 1;
        let captured = context::sync_scope(handle.clone(), || capture_error(&error));
        assert!(captured);

        let unit = context::lock(&handle);
        let exception = unit.payload().exception.as_ref().unwrap();
        assert_eq!(exception.message, "query failed");
        assert_eq!(exception.chain, vec!["connection timed out".to_string()]);
        assert!(exception.class.as_deref().unwrap().ends_with("QueryFailed"));
        assert_eq!(exception.line, Some(line));
        assert!(exception.file.as_deref().unwrap().ends_with("errors.rs"));
    }

    #[test]
    fn test_capture_trait_object_has_no_class() {
        let handle = unit();
        let error: Box<dyn StdError> = "plain failure".into();

        context::sync_scope(handle.clone(), || capture_error(error.as_ref()));

        let unit = context::lock(&handle);
        let exception = unit.payload().exception.as_ref().unwrap();
        assert_eq!(exception.class, None);
        assert_eq!(exception.message, "plain failure");
    }

    #[test]
    fn test_capture_error_outside_unit() {
        let error = std::io::Error::other("nope");
        assert!(!capture_error(&error));
    }

    #[test]
    fn test_panic_hook_records_into_current_unit() {
        install_panic_hook();
        let handle = unit();

        let result = context::sync_scope(handle.clone(), || {
            std::panic::catch_unwind(|| panic!("payment gateway down"))
        });
        assert!(result.is_err());

        let unit = context::lock(&handle);
        let exception = unit.payload().exception.as_ref().unwrap();
        assert_eq!(exception.class.as_deref(), Some("panic"));
        assert_eq!(exception.message, "payment gateway down");
        assert!(exception.file.as_deref().unwrap().ends_with("errors.rs"));
        assert!(exception.line.is_some());
    }
}
