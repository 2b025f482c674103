//! Stream-store queue backend over Redis Streams.
//!
//! Requests are appended to a stream and consumed through a consumer group,
//! which gives durable at-least-once delivery: a message is acknowledged
//! only after the handler succeeds, and unacknowledged messages stay in the
//! pending list for redelivery.
//!
//! Reads are batched (at most [`READ_BATCH`]) with a bounded blocking wait
//! of [`BLOCK_MS`] so cancellation is honoured within one poll interval.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MessageQueue, QueueError, WorkHandler, WorkRequest};

/// Maximum messages fetched per read.
const READ_BATCH: usize = 10;

/// Blocking wait per read, in milliseconds. Bounds how long cancellation
/// can go unnoticed.
const BLOCK_MS: usize = 5_000;

/// Field under which the JSON payload is stored in each stream entry.
const DATA_FIELD: &str = "data";

/// Configuration for [`StreamQueue`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Server address, `host:port`.
    pub addr: String,
    /// Stream key.
    pub stream_key: String,
    /// Consumer group name.
    pub group: String,
    /// Consumer name within the group.
    pub consumer: String,
}

impl StreamConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        StreamConfig {
            addr: addr.into(),
            stream_key: "canopy:work".to_string(),
            group: "canopy-workers".to_string(),
            consumer: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }
}

/// A `MessageQueue` over a durable append-only stream with consumer groups.
pub struct StreamQueue {
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    consumer: String,
}

impl StreamQueue {
    /// Connects and ensures the stream and consumer group exist.
    pub async fn connect(cfg: StreamConfig) -> Result<Self, QueueError> {
        let client = redis::Client::open(format!("redis://{}", cfg.addr))?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        // MKSTREAM creates the stream alongside the group; an existing group
        // is fine.
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&cfg.stream_key, &cfg.group, "$")
            .await;
        if let Err(err) = created
            && err.code() != Some("BUSYGROUP")
        {
            return Err(err.into());
        }

        Ok(StreamQueue {
            conn,
            stream_key: cfg.stream_key,
            group: cfg.group,
            consumer: cfg.consumer,
        })
    }

    /// Handles one stream entry: decode, dispatch, acknowledge.
    ///
    /// Undecodable entries are acknowledged immediately to prevent poison
    /// loops; handler failures leave the entry pending for redelivery.
    async fn process_entry(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamId,
        handler: &Arc<dyn WorkHandler>,
    ) -> Result<(), QueueError> {
        let payload = entry
            .map
            .get(DATA_FIELD)
            .and_then(|value| match value {
                redis::Value::BulkString(bytes) => Some(bytes.clone()),
                redis::Value::SimpleString(s) => Some(s.clone().into_bytes()),
                _ => None,
            });

        let req: WorkRequest = match payload
            .ok_or(())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|_| ()))
        {
            Ok(req) => req,
            Err(()) => {
                warn!(id = %entry.id, "acknowledging undecodable stream entry");
                let _: i64 = conn
                    .xack(&self.stream_key, &self.group, &[&entry.id])
                    .await?;
                return Ok(());
            }
        };

        match handler.handle(req.clone()).await {
            Ok(()) => {
                let _: i64 = conn
                    .xack(&self.stream_key, &self.group, &[&entry.id])
                    .await?;
                Ok(())
            }
            Err(error) => {
                warn!(
                    id = %entry.id,
                    org = %req.org,
                    repo = %req.repo,
                    run_id = req.workflow_run_id,
                    %error,
                    "handler failed; leaving stream entry pending for redelivery"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl MessageQueue for StreamQueue {
    async fn publish(
        &self,
        req: &WorkRequest,
        cancel: &CancellationToken,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_string(req)?;
        let mut conn = self.conn.clone();

        let add = async {
            let _: String = conn
                .xadd(
                    &self.stream_key,
                    "*",
                    &[
                        (DATA_FIELD, payload.as_str()),
                        ("org", req.org.as_str()),
                        ("repo", req.repo.as_str()),
                    ],
                )
                .await?;
            Ok::<(), QueueError>(())
        };

        tokio::select! {
            result = add => result,
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn WorkHandler>,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();

        loop {
            if cancel.is_cancelled() {
                debug!("stream queue subscriber cancelled");
                return Ok(());
            }

            let options = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .count(READ_BATCH)
                .block(BLOCK_MS);

            let stream_keys = [self.stream_key.as_str()];
            let reply: Option<StreamReadReply> = tokio::select! {
                read = conn.xread_options(&stream_keys, &[">"], &options) => {
                    match read {
                        Ok(reply) => reply,
                        Err(error) => {
                            // Poll errors are transient; back off one
                            // interval and keep consuming.
                            warn!(%error, "stream read failed");
                            tokio::select! {
                                _ = tokio::time::sleep(std::time::Duration::from_millis(BLOCK_MS as u64)) => continue,
                                _ = cancel.cancelled() => return Ok(()),
                            }
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("stream queue subscriber cancelled");
                    return Ok(());
                }
            };

            let Some(reply) = reply else {
                continue;
            };

            for key in &reply.keys {
                for entry in &key.ids {
                    self.process_entry(&mut conn, entry, &handler).await?;
                }
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        // Connections are multiplexed and close on drop.
        Ok(())
    }
}
