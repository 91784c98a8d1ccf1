//! In-process telemetry collection with N+1 query detection.
//!
//! The [`collector::Collector`] tracks units of work (HTTP requests, CLI
//! commands, queue jobs). While a unit runs, executed SQL statements, log
//! lines, outgoing HTTP calls and errors are attached to it; when it ends,
//! repeated query patterns are reported as N+1 findings and the assembled
//! payload is posted to the ingestion endpoint.
//!
//! ```ignore
//! let config = querylens::config::load_config(None)?;
//! querylens::logging::init_tracing(&config);
//! let collector = Arc::new(Collector::new(config)?);
//!
//! let app = Router::new()
//!     .route("/api/users", get(list_users))
//!     .layer(middleware::from_fn_with_state(collector.clone(), collect_requests));
//! ```

pub mod capture;
pub mod collector;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod query;

pub use collector::{record_query, Collector};
pub use error::{Error, Result};
pub use query::QueryEvent;
