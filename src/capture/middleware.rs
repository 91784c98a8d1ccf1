//! axum middleware collecting tracked requests as units of work

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;

use crate::collector::{context, Collector, RequestInfo, UnitGuard, UnitKind};

/// Request collection middleware
///
/// Opens an HTTP unit of work for tracked paths, runs the handler inside it,
/// records the request metadata and flushes the unit in the background so
/// the response is never delayed by delivery.
///
/// ```ignore
/// let app = Router::new()
///     .route("/api/users", get(list_users))
///     .layer(middleware::from_fn_with_state(collector.clone(), collect_requests));
/// ```
pub async fn collect_requests(
    State(collector): State<Arc<Collector>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().trim_start_matches('/').to_string();
    if !collector.should_track(&path) {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let uri = req.uri().to_string();
    let started = Instant::now();

    let handle = collector.begin(UnitKind::Http, path);
    let guard = UnitGuard::new(&collector, handle.clone());
    let response = context::scope(handle.clone(), next.run(req)).await;
    guard.disarm();

    context::lock(&handle).set_request(RequestInfo {
        method,
        uri,
        status_code: Some(response.status().as_u16()),
        duration_ms: started.elapsed().as_millis() as u64,
    });

    tokio::spawn(async move {
        collector.flush(&handle).await;
    });

    response
}
