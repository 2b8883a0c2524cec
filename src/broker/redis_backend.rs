//! Redis-backed broker: one durable list per device with an unacked side
//! list for consume-with-ack semantics.
//!
//! Publish pushes to the head of `{prefix}:{uid}`; the consumer moves the
//! tail into `{prefix}:{uid}:unacked`, delivers, and removes the entry only
//! after the sink accepts it. Entries left unacked by a crashed or failed
//! delivery are moved back onto the queue the next time a channel opens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tokio::sync::{watch, RwLock};

use crate::infrastructure::config::BrokerConfig;

use super::{Broker, BrokerChannel, BrokerError, MessageSink};

/// Seconds a consume poll blocks before re-checking for shutdown.
const CONSUME_BLOCK_SECONDS: f64 = 1.0;

pub struct RedisBroker {
    client: Client,
    /// Shared publisher connection, established lazily
    publisher: RwLock<Option<MultiplexedConnection>>,
    prefix: String,
    retry_interval: Duration,
}

impl RedisBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let client = Client::open(config.url())?;

        Ok(Self {
            client,
            publisher: RwLock::new(None),
            prefix: config.queue_prefix.clone(),
            retry_interval: Duration::from_secs(config.retry_interval_seconds),
        })
    }

    fn queue_key(&self, device_uid: &str) -> String {
        format!("{}:{}", self.prefix, device_uid)
    }

    fn unacked_key(&self, device_uid: &str) -> String {
        format!("{}:{}:unacked", self.prefix, device_uid)
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, BrokerError> {
        {
            let conn = self.publisher.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut guard = self.publisher.write().await;
        // Double-check in case another task connected while we waited
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        let conn = self.client.get_multiplexed_tokio_connection().await?;
        *guard = Some(conn.clone());
        tracing::info!("Broker publisher connection established");
        Ok(conn)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn open_channel(
        &self,
        device_uid: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<BrokerChannel, BrokerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = ConsumerLoop {
            // Each consumer owns its own connection; blocking pops must not
            // stall sibling channels or the publisher.
            client: self.client.clone(),
            device_uid: device_uid.to_string(),
            queue: self.queue_key(device_uid),
            unacked: self.unacked_key(device_uid),
            retry_interval: self.retry_interval,
            sink,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(consumer.run());

        Ok(BrokerChannel::new(device_uid.to_string(), shutdown_tx, task))
    }

    async fn publish(&self, device_uid: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut conn = self.publisher().await?;

        let pushed: Result<(), RedisError> = redis::cmd("LPUSH")
            .arg(self.queue_key(device_uid))
            .arg(payload)
            .query_async(&mut conn)
            .await;

        if let Err(ref e) = pushed {
            if e.is_connection_dropped() || e.is_io_error() {
                // Clear so the next publish reconnects
                *self.publisher.write().await = None;
            }
        }

        pushed.map_err(BrokerError::Redis)
    }
}

enum ConsumeExit {
    Shutdown,
    SinkClosed,
    Connection,
}

struct ConsumerLoop {
    client: Client,
    device_uid: String,
    queue: String,
    unacked: String,
    retry_interval: Duration,
    sink: Arc<dyn MessageSink>,
    shutdown: watch::Receiver<bool>,
}

impl ConsumerLoop {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.client.get_multiplexed_tokio_connection().await {
                Ok(mut conn) => {
                    if let Err(e) = self.requeue_unacked(&mut conn).await {
                        tracing::warn!(
                            device = %self.device_uid,
                            error = %e,
                            "Failed to requeue unacknowledged deliveries"
                        );
                    }

                    tracing::info!(device = %self.device_uid, queue = %self.queue, "Consuming device queue");

                    match self.consume(&mut conn).await {
                        ConsumeExit::Shutdown => break,
                        ConsumeExit::SinkClosed => break,
                        ConsumeExit::Connection => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        device = %self.device_uid,
                        error = %e,
                        "Broker connection failed"
                    );
                }
            }

            // Retry after the configured interval unless shutdown wins
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }

        tracing::debug!(device = %self.device_uid, "Broker consumer stopped");
    }

    /// Move deliveries a previous consumer never acknowledged back onto the
    /// queue so they are redelivered.
    async fn requeue_unacked(&self, conn: &mut MultiplexedConnection) -> Result<(), RedisError> {
        let mut moved = 0usize;
        loop {
            let item: Option<Vec<u8>> = redis::cmd("LMOVE")
                .arg(&self.unacked)
                .arg(&self.queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(conn)
                .await?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }

        if moved > 0 {
            tracing::info!(
                device = %self.device_uid,
                redelivered = moved,
                "Requeued unacknowledged deliveries"
            );
        }
        Ok(())
    }

    async fn consume(&mut self, conn: &mut MultiplexedConnection) -> ConsumeExit {
        loop {
            if *self.shutdown.borrow() {
                return ConsumeExit::Shutdown;
            }

            let popped: Result<Option<Vec<u8>>, RedisError> = redis::cmd("BLMOVE")
                .arg(&self.queue)
                .arg(&self.unacked)
                .arg("RIGHT")
                .arg("LEFT")
                .arg(CONSUME_BLOCK_SECONDS)
                .query_async(conn)
                .await;

            match popped {
                Ok(Some(payload)) => {
                    if self.sink.deliver(payload.clone()).await.is_err() {
                        // Leave the entry unacked; it is redelivered when the
                        // device reconnects and a fresh channel opens.
                        tracing::debug!(
                            device = %self.device_uid,
                            "Delivery sink closed, leaving message unacknowledged"
                        );
                        return ConsumeExit::SinkClosed;
                    }

                    let acked: Result<(), RedisError> = redis::cmd("LREM")
                        .arg(&self.unacked)
                        .arg(1)
                        .arg(&payload)
                        .query_async(conn)
                        .await;

                    if let Err(e) = acked {
                        tracing::warn!(
                            device = %self.device_uid,
                            error = %e,
                            "Failed to acknowledge delivery"
                        );
                        return ConsumeExit::Connection;
                    }
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        device = %self.device_uid,
                        error = %e,
                        "Consume poll failed"
                    );
                    return ConsumeExit::Connection;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::BrokerConfig;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            backend: "redis".into(),
            host: "localhost".into(),
            port: 6379,
            retry_interval_seconds: 1,
            queue_prefix: "device".into(),
        }
    }

    #[test]
    fn test_key_shapes() {
        let broker = RedisBroker::new(&test_config()).unwrap();
        assert_eq!(broker.queue_key("abc123"), "device:abc123");
        assert_eq!(broker.unacked_key("abc123"), "device:abc123:unacked");
    }
}
