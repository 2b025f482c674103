//! Work delivery between the receiver and the worker.
//!
//! A [`WorkRequest`] is the entire carrier of work: no credentials, no
//! payload. The worker re-fetches authoritative state from the forge, which
//! is what makes at-least-once delivery safe.
//!
//! Delivery semantics: a request is acknowledged iff the handler returns
//! without error; handler errors leave the message for redelivery. Invalid
//! message contents are acknowledged so they cannot poison the queue.

pub mod inmemory;
pub mod stream;
pub mod topic;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use inmemory::InMemoryQueue;
pub use stream::{StreamConfig, StreamQueue};
pub use topic::{TopicConfig, TopicQueue};

/// The message that passes from receiver to worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    pub org: String,
    pub repo: String,
    pub workflow_run_id: u64,
}

/// Errors produced by queue backends.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Publish on a queue that has been closed.
    #[error("queue is closed")]
    Closed,

    /// The caller's cancellation token fired while an operation blocked.
    #[error("operation cancelled")]
    Cancelled,

    /// A second subscriber attached to a single-consumer backend.
    #[error("queue already has a subscriber")]
    AlreadySubscribed,

    #[error("failed to encode work request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stream backend error: {0}")]
    Stream(#[from] redis::RedisError),

    #[error("topic backend error: {0}")]
    Topic(String),
}

/// Error type handlers may return; the queue only cares whether one
/// occurred.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one work request. Returning `Ok` acknowledges the message.
#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, req: WorkRequest) -> Result<(), HandlerError>;
}

/// Adapts a closure into a [`WorkHandler`]. Mostly useful in tests.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> WorkHandler for FnHandler<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, req: WorkRequest) -> Result<(), HandlerError> {
        (self.0)(req).await
    }
}

/// A pluggable message queue carrying JSON-encoded [`WorkRequest`]s.
///
/// All backends honour cancellation within one polling interval. Delivery is
/// at least once except where a backend documents otherwise.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Publishes a request. Blocks (respecting `cancel`) if the backend
    /// applies backpressure.
    async fn publish(&self, req: &WorkRequest, cancel: &CancellationToken)
    -> Result<(), QueueError>;

    /// Consumes requests, invoking `handler` for each. Blocks until `cancel`
    /// fires or the queue closes.
    async fn subscribe(
        &self,
        handler: Arc<dyn WorkHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError>;

    /// Releases backend resources. The queue must not be used afterwards.
    async fn close(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_request_wire_format() {
        let req = WorkRequest {
            org: "grafana".to_string(),
            repo: "repo".to_string(),
            workflow_run_id: 42,
        };

        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"org":"grafana","repo":"repo","workflow_run_id":42}"#
        );

        let parsed: WorkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn work_request_rejects_missing_fields() {
        let result: Result<WorkRequest, _> = serde_json::from_str(r#"{"org":"grafana"}"#);
        assert!(result.is_err());
    }
}
