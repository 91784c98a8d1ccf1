//! Adapters feeding the collector from the host application
//!
//! - `layer`: tracing events (log lines, sqlx statements)
//! - `middleware`: axum request lifecycle
//! - `http_client`: outgoing reqwest calls
//! - `errors`: errors and panics

pub mod errors;
pub mod http_client;
pub mod layer;
pub mod middleware;

pub use errors::{capture_error, install_panic_hook};
pub use http_client::TracedClient;
pub use layer::CaptureLayer;
pub use middleware::collect_requests;
