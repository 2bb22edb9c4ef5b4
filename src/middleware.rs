use axum::{
    extract::{Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::response::BackpressureResponse;
use crate::throttler::{SubmitFuture, ThrottleStatus, Throttler};

pub const DEFAULT_PRIORITY_HEADER: &str = "x-priority";

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_QUEUE_SIZE: HeaderName = HeaderName::from_static("x-ratelimit-queuesize");

type SkipPredicate = dyn Fn(&Request) -> bool + Send + Sync;

/// Options of [`throttling_middleware`].
#[derive(Clone)]
pub struct ThrottleLayerOptions {
    /// Header whose value `high` marks a request as priority.
    pub priority_header: String,
    /// Requests matching this predicate bypass throttling entirely.
    pub skip: Option<Arc<SkipPredicate>>,
}

impl Default for ThrottleLayerOptions {
    fn default() -> Self {
        Self {
            priority_header: DEFAULT_PRIORITY_HEADER.to_string(),
            skip: None,
        }
    }
}

impl ThrottleLayerOptions {
    pub fn priority_header(mut self, header: impl Into<String>) -> Self {
        self.priority_header = header.into();
        self
    }

    pub fn skip_when(mut self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Arc::new(predicate));
        self
    }
}

/// State for `axum::middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct ThrottleLayerState {
    pub throttler: Throttler,
    pub options: ThrottleLayerOptions,
}

impl ThrottleLayerState {
    pub fn new(throttler: Throttler) -> Self {
        Self {
            throttler,
            options: ThrottleLayerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ThrottleLayerOptions) -> Self {
        self.options = options;
        self
    }
}

/// Per-request handle for running payment work through the throttler.
///
/// Inserted as a request extension by [`throttling_middleware`].
#[derive(Clone, Debug)]
pub struct ThrottleContext {
    pub transaction_id: String,
    pub priority: bool,
    pub throttler: Throttler,
}

impl ThrottleContext {
    pub fn submit<F, Fut, T, E>(&self, work: F) -> SubmitFuture<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        self.throttler
            .submit(self.transaction_id.clone(), work, self.priority)
    }
}

/// Seconds until the current queue should have drained at the configured rate.
pub fn retry_after_secs(status: &ThrottleStatus) -> u64 {
    let rate = u64::from(status.rate_per_minute.max(1));
    (status.queue_size as u64 * 60).div_ceil(rate)
}

fn set_rate_limit_headers(headers: &mut HeaderMap, status: &ThrottleStatus) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(status.rate_per_minute));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(status.current_tokens));
    headers.insert(X_RATELIMIT_QUEUE_SIZE, HeaderValue::from(status.queue_size));
}

/// Admission middleware: answers 429 when the throttler has no capacity,
/// otherwise attaches a [`ThrottleContext`] and runs the handler.
pub async fn throttling_middleware(
    State(layer): State<ThrottleLayerState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(skip) = &layer.options.skip {
        if skip(&request) {
            return next.run(request).await;
        }
    }

    let throttler = &layer.throttler;

    if !throttler.has_capacity() {
        let status = throttler.status();
        let retry_after = retry_after_secs(&status);
        warn!(
            target: "payroll_throttle::middleware",
            queue_size = status.queue_size,
            retry_after,
            "rejecting request, throttler has no capacity"
        );

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(BackpressureResponse::queue_full(retry_after)),
        )
            .into_response();
        set_rate_limit_headers(response.headers_mut(), &status);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let transaction_id = format!("tx-{}", Uuid::new_v4());
    let priority = request
        .headers()
        .get(layer.options.priority_header.as_str())
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("high"));

    debug!(
        target: "payroll_throttle::middleware",
        transaction_id = %transaction_id,
        priority,
        "request admitted"
    );

    request.extensions_mut().insert(ThrottleContext {
        transaction_id: transaction_id.clone(),
        priority,
        throttler: throttler.clone(),
    });

    let mut response = next.run(request).await;

    if response.status().as_u16() >= 400 {
        warn!(
            target: "payroll_throttle::middleware",
            transaction_id = %transaction_id,
            status = %response.status(),
            "throttled request failed"
        );
    }

    set_rate_limit_headers(response.headers_mut(), &throttler.status());
    response
}
