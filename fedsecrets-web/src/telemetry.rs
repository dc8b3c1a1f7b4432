use std::fmt;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, Span, info_span};
use tracing_subscriber::{EnvFilter, fmt as log_fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const DEFAULT_FILTER: &str = "info";
const VERBOSE_FILTER: &str = "debug,hyper=info,hyper_util=info,reqwest=info";
const MAX_CORRELATION_ID_LEN: usize = 128;

/// JSON logs on stdout. `RUST_LOG` wins over the built-in filter.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })?,
    };
    let json = log_fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(false);

    // A subscriber installed earlier (tests, embedding) is kept.
    let _ = tracing_subscriber::registry().with(filter).with(json).try_init();
    Ok(())
}

/// Request-scoped id echoed in `x-correlation-id` and in error bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Reuse the caller's id when it is short printable ASCII.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| {
                !value.is_empty()
                    && value.len() <= MAX_CORRELATION_ID_LEN
                    && value.bytes().all(|b| b.is_ascii_graphic())
            })
            .map(|value| Self(value.to_string()))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn header_value(id: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(id).ok()
}

pub async fn correlation_layer(mut req: Request<Body>, next: Next) -> Response {
    let correlation = CorrelationId::from_headers(req.headers());
    let span = info_span!(
        "request",
        method = %req.method(),
        uri = %req.uri().path(),
        correlation_id = %correlation
    );
    req.extensions_mut().insert(correlation.clone());

    let mut response = next.run(req).instrument(span).await;
    if let Some(value) = header_value(correlation.as_str()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

pub fn request_span(operation: &str, correlation: &CorrelationId) -> Span {
    info_span!("fedsecrets.op", operation, correlation_id = %correlation)
}
