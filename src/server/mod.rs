//! HTTP receiver for the two-stage pipeline.
//!
//! The receiver holds no forge credentials. It authenticates webhook
//! deliveries (HMAC), applies the event filters, converts accepted events
//! into work requests, and publishes them to the queue. All external
//! mutations happen in the worker.
//!
//! # Endpoints
//!
//! - `POST /webhook` - accepts workflow-run deliveries (202 on publish)
//! - `GET /health` - liveness probe

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::queue::MessageQueue;
use crate::webhooks::EventFilter;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::webhook_handler;

/// Per-request timeout; matches the intended read/write bounds of the
/// listener.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared receiver state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Destination for accepted work requests.
    queue: Arc<dyn MessageQueue>,

    /// HMAC secret. `None` disables signature validation (development mode
    /// only); every other filter still applies.
    webhook_secret: Option<Vec<u8>>,

    /// Org and workflow allow-lists.
    filter: EventFilter,

    /// Process shutdown token; bounds in-flight publishes.
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        webhook_secret: Option<Vec<u8>>,
        filter: EventFilter,
        shutdown: CancellationToken,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                queue,
                webhook_secret,
                filter,
                shutdown,
            }),
        }
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.inner.queue
    }

    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.inner.webhook_secret.as_deref()
    }

    pub fn filter(&self) -> &EventFilter {
        &self.inner.filter
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }
}

/// The request id attached to each request, echoed back in the response.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Propagates `X-Request-ID`: incoming values are kept, absent ones are
/// generated, and the id is echoed on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Builds the axum router with all endpoints and middleware.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(InMemoryQueue::new()),
            Some(b"secret".to_vec()),
            EventFilter::new(vec!["grafana".to_string()], Vec::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn app_state_accessors() {
        let state = test_state();
        assert_eq!(state.webhook_secret(), Some(b"secret".as_slice()));
        assert!(!state.shutdown().is_cancelled());
    }

    #[test]
    fn app_state_is_cheap_to_clone() {
        let state = test_state();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.inner, &cloned.inner));
    }
}
