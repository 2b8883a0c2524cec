//! In-memory broker with the same deliver-then-ack contract as the Redis
//! backend, for tests and standalone runs.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, Notify};

use super::{Broker, BrokerChannel, BrokerError, MessageSink};

/// How long an idle consumer waits before re-checking its queue.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct MemoryQueue {
    items: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
}

#[derive(Default)]
pub struct MemoryBroker {
    queues: DashMap<String, Arc<MemoryQueue>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, device_uid: &str) -> Arc<MemoryQueue> {
        self.queues
            .entry(device_uid.to_string())
            .or_default()
            .clone()
    }

    /// Messages currently waiting on a device queue.
    pub async fn queue_depth(&self, device_uid: &str) -> usize {
        match self.queues.get(device_uid) {
            Some(queue) => queue.items.lock().await.len(),
            None => 0,
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_channel(
        &self,
        device_uid: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<BrokerChannel, BrokerError> {
        let queue = self.queue(device_uid);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let uid = device_uid.to_string();

        let task = tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                let next = queue.items.lock().await.pop_front();
                match next {
                    Some(payload) => {
                        if sink.deliver(payload.clone()).await.is_err() {
                            // Not acknowledged: put it back for redelivery
                            queue.items.lock().await.push_front(payload);
                            tracing::debug!(device = %uid, "Delivery sink closed");
                            break;
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = queue.notify.notified() => {}
                            _ = shutdown_rx.changed() => {}
                            _ = tokio::time::sleep(IDLE_POLL) => {}
                        }
                    }
                }
            }
        });

        Ok(BrokerChannel::new(device_uid.to_string(), shutdown_tx, task))
    }

    async fn publish(&self, device_uid: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let queue = self.queue(device_uid);
        queue.items.lock().await.push_back(payload.to_vec());
        queue.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::SinkClosed;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct ChannelSink {
        tx: mpsc::Sender<Vec<u8>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl MessageSink for ChannelSink {
        async fn deliver(&self, payload: Vec<u8>) -> Result<(), SinkClosed> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkClosed);
            }
            self.tx.send(payload).await.map_err(|_| SinkClosed)
        }
    }

    #[tokio::test]
    async fn test_publish_is_consumed_and_acked() {
        let broker = MemoryBroker::new();
        let (tx, mut rx) = mpsc::channel(8);
        let sink = Arc::new(ChannelSink {
            tx,
            fail: AtomicBool::new(false),
        });

        let channel = broker.open_channel("dev-uid", sink).await.unwrap();
        broker.publish("dev-uid", b"{\"Reboot\":1}").await.unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered, b"{\"Reboot\":1}");

        // Give the consumer a beat to finish the ack
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.queue_depth("dev-uid").await, 0);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_failed_delivery_stays_queued() {
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::channel(8);
        let sink = Arc::new(ChannelSink {
            tx,
            fail: AtomicBool::new(true),
        });

        let channel = broker.open_channel("dev-uid", sink).await.unwrap();
        broker.publish("dev-uid", b"payload").await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.close().await;

        // Unacknowledged message remains for the next channel
        assert_eq!(broker.queue_depth("dev-uid").await, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = MemoryBroker::new();
        let (tx, _rx) = mpsc::channel(8);
        let sink = Arc::new(ChannelSink {
            tx,
            fail: AtomicBool::new(false),
        });

        let channel = broker.open_channel("dev-uid", sink).await.unwrap();
        channel.close().await;
        channel.close().await;
        assert!(channel.is_closed());
    }
}
