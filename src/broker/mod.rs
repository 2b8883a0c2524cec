//! Broker bridge: one durable delivery queue per device identity.
//!
//! Externally published messages land on a per-device queue; an open channel
//! consumes them and forwards each payload to the session's outbound sink.
//! Acknowledgment happens only after the sink accepts the payload, so a
//! crash between delivery and ack redelivers (at-least-once to the socket).

mod factory;
mod memory_backend;
mod redis_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

pub use factory::create_broker;
pub use memory_backend::MemoryBroker;
pub use redis_backend::RedisBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("unknown broker backend: {0}")]
    UnknownBackend(String),
}

/// The session-side delivery target of a consumed message.
#[derive(Debug, Error)]
#[error("delivery sink closed")]
pub struct SinkClosed;

#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Forward one consumed payload toward the socket. An error means the
    /// socket-side channel is gone and the message must not be acknowledged.
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), SinkClosed>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare the device's durable queue and start consuming into `sink`.
    async fn open_channel(
        &self,
        device_uid: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<BrokerChannel, BrokerError>;

    /// Append a payload to a device's queue.
    async fn publish(&self, device_uid: &str, payload: &[u8]) -> Result<(), BrokerError>;
}

/// Handle to a per-device consumer. Closing stops the consumer and releases
/// broker-side resources; closing twice is a no-op.
pub struct BrokerChannel {
    device_uid: String,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerChannel {
    pub(crate) fn new(
        device_uid: String,
        shutdown: watch::Sender<bool>,
        consumer: JoinHandle<()>,
    ) -> Self {
        Self {
            device_uid,
            closed: AtomicBool::new(false),
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    pub fn device_uid(&self) -> &str {
        &self.device_uid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.shutdown.send(true);
        if let Some(task) = self.consumer.lock().await.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!(device = %self.device_uid, "Broker consumer panicked");
                }
            }
        }

        tracing::debug!(device = %self.device_uid, "Broker channel closed");
    }
}
