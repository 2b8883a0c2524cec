//! Session lifecycle orchestration: resource acquisition on open, frame
//! routing while active, idempotent teardown on close.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::DeviceIdentity;
use crate::broker::Broker;
use crate::devicelog::DeviceLogWriter;
use crate::dispatch::MessageDispatcher;
use crate::infrastructure::crypto::FrameCipher;
use crate::infrastructure::mysql::AcquireError;
use crate::persistence::StoreProvider;

use super::{CloseReason, OutboundSink, Session, SessionRegistry};

pub struct SessionManager {
    stores: Arc<dyn StoreProvider>,
    broker: Arc<dyn Broker>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    device_log: Arc<DeviceLogWriter>,
    outbound_cipher: Option<Arc<FrameCipher>>,
    channel_buffer: usize,
}

impl SessionManager {
    pub fn new(
        stores: Arc<dyn StoreProvider>,
        broker: Arc<dyn Broker>,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        device_log: Arc<DeviceLogWriter>,
        outbound_cipher: Option<Arc<FrameCipher>>,
        channel_buffer: usize,
    ) -> Self {
        Self {
            stores,
            broker,
            registry,
            dispatcher,
            device_log,
            outbound_cipher,
            channel_buffer,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Materialize a session for an authenticated identity.
    ///
    /// Acquires the persistence handle first; on capacity failure no session
    /// exists and no broker channel is ever opened, and the caller sends the
    /// capacity sentinel and drops the transport. On success the session is
    /// registered, its broker channel consuming, and its state `Active`.
    /// Returns the session together with the outbound frame receiver the
    /// transport must drain.
    pub async fn open(
        &self,
        identity: DeviceIdentity,
    ) -> Result<(Arc<Session>, mpsc::Receiver<String>), AcquireError> {
        tracing::debug!(device = %identity.uid, "Acquiring persistence handle");
        let store = self.stores.acquire_store().await?;

        let (tx, rx) = mpsc::channel(self.channel_buffer);
        let session = Arc::new(Session::new(
            identity,
            store,
            tx.clone(),
            self.outbound_cipher.clone(),
            self.device_log.clone(),
        ));
        self.registry.insert(session.clone());

        let sink = Arc::new(OutboundSink::new(self.outbound_cipher.clone(), tx));
        match self
            .broker
            .open_channel(&session.identity().uid, sink)
            .await
        {
            Ok(channel) => session.attach_channel(channel).await,
            Err(e) => {
                // Dependency failure stays local: the session still serves
                // inbound traffic, outbound broker delivery is lost.
                tracing::error!(
                    device = %session.identity().uid,
                    error = %e,
                    "Failed to open broker channel"
                );
            }
        }

        session.set_active().await;

        tracing::info!(
            connection_id = %session.id(),
            device = %session.identity().uid,
            username = %session.identity().username,
            device_type = %session.identity().device_type,
            "Session established"
        );

        Ok((session, rx))
    }

    /// Route one inbound frame through the dispatcher.
    pub async fn inbound(&self, session: &Arc<Session>, frame: &str) {
        self.dispatcher.dispatch(session, frame).await;
    }

    /// Tear down and unregister. Safe to call for an already-closed session.
    pub async fn close(&self, session: &Arc<Session>, reason: CloseReason) {
        session.close(reason).await;
        self.registry.remove(session.id());
    }
}
