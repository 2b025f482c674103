//! In-process queue backend.
//!
//! A bounded channel for single-process (all-in-one) deployments. Publish
//! takes a shared lock and blocks on the caller's cancellation token when
//! the buffer is full; close takes the exclusive lock and closes the
//! channel.
//!
//! Handler errors are logged and not retried. This is the one exception to
//! at-least-once delivery: in a single process there is nothing that could
//! meaningfully redeliver.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MessageQueue, QueueError, WorkHandler, WorkRequest};

/// Default channel capacity.
const DEFAULT_BUFFER: usize = 100;

/// An in-process `MessageQueue` over a bounded channel.
pub struct InMemoryQueue {
    /// `None` once the queue is closed. Publish holds the read lock, close
    /// the write lock.
    tx: RwLock<Option<mpsc::Sender<WorkRequest>>>,

    /// Taken by the (single) subscriber.
    rx: Mutex<Option<mpsc::Receiver<WorkRequest>>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER)
    }

    pub fn with_capacity(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        InMemoryQueue {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(
        &self,
        req: &WorkRequest,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let sender = {
            let guard = self.tx.read().await;
            guard.as_ref().cloned().ok_or(QueueError::Closed)?
        };

        tokio::select! {
            sent = sender.send(req.clone()) => sent.map_err(|_| QueueError::Closed),
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn WorkHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or(QueueError::AlreadySubscribed)?;

        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(req) => {
                        // No retry here: a failed request is dropped.
                        if let Err(error) = handler.handle(req.clone()).await {
                            warn!(
                                org = %req.org,
                                repo = %req.repo,
                                run_id = req.workflow_run_id,
                                %error,
                                "work request failed; in-memory queue does not redeliver"
                            );
                        }
                    }
                    None => {
                        debug!("in-memory queue closed and drained");
                        return Ok(());
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("in-memory queue subscriber cancelled");
                    return Ok(());
                }
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        // Dropping the sender closes the channel; the subscriber drains what
        // remains and exits.
        self.tx.write().await.take();
        Ok(())
    }
}
