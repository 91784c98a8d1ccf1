//! Outgoing HTTP call recording

use chrono::Utc;
use reqwest::{IntoUrl, Method, Request, RequestBuilder, Response};
use std::sync::Arc;
use std::time::Instant;

use crate::collector::redact::filter_headers;
use crate::collector::{context, Collector, OutgoingRequest};

/// `reqwest::Client` wrapper that records every call made inside a unit of work.
///
/// Calls to the ingestion endpoint are passed through untouched.
#[derive(Clone)]
pub struct TracedClient {
    inner: reqwest::Client,
    collector: Arc<Collector>,
}

impl TracedClient {
    pub fn new(inner: reqwest::Client, collector: Arc<Collector>) -> Self {
        Self { inner, collector }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Build and execute `builder`, recording the call.
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        let url = request.url().to_string();
        if context::current().is_none() || self.collector.is_telemetry_url(&url) {
            return self.inner.execute(request).await;
        }

        let settings = self.collector.settings();
        let method = request.method().to_string();
        let headers = filter_headers(request.headers(), settings.headers.as_ref());
        let timestamp = Utc::now();
        let started = Instant::now();

        let result = self.inner.execute(request).await;
        let duration_ms = (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0;

        let outgoing = match &result {
            Ok(response) => OutgoingRequest {
                method,
                uri: url,
                headers,
                status_code: Some(response.status().as_u16()),
                response_headers: filter_headers(response.headers(), settings.headers.as_ref()),
                duration_ms,
                error: None,
                timestamp,
            },
            Err(e) => OutgoingRequest {
                method,
                uri: url,
                headers,
                status_code: None,
                response_headers: Default::default(),
                duration_ms,
                error: Some(e.to_string()),
                timestamp,
            },
        };

        context::with_current(|unit| unit.add_outgoing_request(outgoing));
        result
    }
}
