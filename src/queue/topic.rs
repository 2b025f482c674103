//! Topic/subscription queue backend.
//!
//! Uses the managed pub/sub service's native acknowledgement: ack on
//! handler success, nack on failure so the service redelivers. Invalid
//! message contents are acknowledged to prevent poison loops.

use std::sync::Arc;

use async_trait::async_trait;
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::publisher::Publisher;
use google_cloud_pubsub::subscription::{ReceiveConfig, Subscription};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MessageQueue, QueueError, WorkHandler, WorkRequest};

/// Cap on concurrently outstanding messages per subscriber.
const MAX_OUTSTANDING: usize = 10;

/// Configuration for [`TopicQueue`].
#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub project: String,
    pub topic: String,
    pub subscription: String,
}

/// A `MessageQueue` over a managed topic/subscription service.
pub struct TopicQueue {
    publisher: Mutex<Publisher>,
    subscription: Subscription,
}

impl TopicQueue {
    /// Connects using ambient credentials.
    pub async fn connect(cfg: TopicConfig) -> Result<Self, QueueError> {
        let mut client_config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| QueueError::Topic(e.to_string()))?;
        client_config.project_id = Some(cfg.project);

        let client = Client::new(client_config)
            .await
            .map_err(|e| QueueError::Topic(e.to_string()))?;

        let topic = client.topic(&cfg.topic);
        let publisher = topic.new_publisher(None);
        let subscription = client.subscription(&cfg.subscription);

        Ok(TopicQueue {
            publisher: Mutex::new(publisher),
            subscription,
        })
    }
}

#[async_trait]
impl MessageQueue for TopicQueue {
    async fn publish(
        &self,
        req: &WorkRequest,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let message = google_cloud_googleapis::pubsub::v1::PubsubMessage {
            data: serde_json::to_vec(req)?.into(),
            ..Default::default()
        };

        let awaiter = {
            let publisher = self.publisher.lock().await;
            publisher.publish(message).await
        };

        tokio::select! {
            result = awaiter.get() => result
                .map(|_| ())
                .map_err(|e| QueueError::Topic(e.to_string())),
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn WorkHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let receive = self.subscription.receive(
            move |message, _ctx| {
                let handler = Arc::clone(&handler);
                async move {
                    let req: WorkRequest =
                        match serde_json::from_slice(&message.message.data) {
                            Ok(req) => req,
                            Err(error) => {
                                warn!(%error, "acknowledging undecodable message");
                                let _ = message.ack().await;
                                return;
                            }
                        };

                    match handler.handle(req.clone()).await {
                        Ok(()) => {
                            let _ = message.ack().await;
                        }
                        Err(error) => {
                            warn!(
                                org = %req.org,
                                repo = %req.repo,
                                run_id = req.workflow_run_id,
                                %error,
                                "handler failed; nacking for redelivery"
                            );
                            let _ = message.nack().await;
                        }
                    }
                }
            },
            cancel.clone(),
            Some(ReceiveConfig {
                worker_count: MAX_OUTSTANDING,
                ..Default::default()
            }),
        );

        receive.await.map_err(|e| QueueError::Topic(e.to_string()))?;
        debug!("topic queue subscriber stopped");
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.publisher.lock().await.shutdown().await;
        Ok(())
    }
}
