use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::auth::DeviceIdentity;
use crate::broker::{BrokerChannel, MessageSink, SinkClosed};
use crate::devicelog::DeviceLogWriter;
use crate::infrastructure::crypto::FrameCipher;
use crate::persistence::DeviceStore;

use super::SessionState;

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean close frame from the device
    Normal,
    /// Transport error mid-session
    TransportError,
    /// Evicted by the half-closed-socket sweep
    Swept,
}

/// One authenticated device connection and the resources it owns.
///
/// The session owns its persistence handle and broker channel; the
/// dispatcher and the broker consumer only borrow it. Teardown is
/// idempotent and order-independent across the two resources.
pub struct Session {
    id: Uuid,
    identity: DeviceIdentity,
    store: Arc<dyn DeviceStore>,
    channel: Mutex<Option<BrokerChannel>>,
    outbound: mpsc::Sender<String>,
    outbound_cipher: Option<Arc<FrameCipher>>,
    device_log: Arc<DeviceLogWriter>,
    state: RwLock<SessionState>,
    connected_at: DateTime<Utc>,
    last_seen: RwLock<DateTime<Utc>>,
}

impl Session {
    pub fn new(
        identity: DeviceIdentity,
        store: Arc<dyn DeviceStore>,
        outbound: mpsc::Sender<String>,
        outbound_cipher: Option<Arc<FrameCipher>>,
        device_log: Arc<DeviceLogWriter>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            identity,
            store,
            channel: Mutex::new(None),
            outbound,
            outbound_cipher,
            device_log,
            state: RwLock::new(SessionState::Authenticated),
            connected_at: now,
            last_seen: RwLock::new(now),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn device_log(&self) -> &Arc<DeviceLogWriter> {
        &self.device_log
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_active(&self) {
        let mut state = self.state.write().await;
        if !state.is_closing() {
            *state = SessionState::Active;
        }
    }

    /// A session routes frames only while it is `Active` and the outbound
    /// transport still has a receiver.
    pub async fn is_live(&self) -> bool {
        *self.state.read().await == SessionState::Active && !self.outbound.is_closed()
    }

    /// The socket-side receiver is gone without normal teardown having run.
    pub async fn is_half_closed(&self) -> bool {
        self.outbound.is_closed() && !self.state.read().await.is_closing()
    }

    pub async fn touch(&self) {
        *self.last_seen.write().await = Utc::now();
    }

    pub async fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().await
    }

    pub async fn attach_channel(&self, channel: BrokerChannel) {
        *self.channel.lock().await = Some(channel);
    }

    /// Send a bare sentinel string, never encrypted.
    pub async fn send_sentinel(&self, sentinel: &str) {
        if self.outbound.send(sentinel.to_string()).await.is_err() {
            tracing::debug!(device = %self.identity.uid, "Sentinel dropped, transport gone");
        }
    }

    /// Send a payload-bearing reply, encrypted when outbound encryption is
    /// configured.
    pub async fn send_reply(&self, text: String) {
        let frame = match &self.outbound_cipher {
            Some(cipher) => cipher.encrypt(&text),
            None => text,
        };
        if self.outbound.send(frame).await.is_err() {
            tracing::debug!(device = %self.identity.uid, "Reply dropped, transport gone");
        }
    }

    /// Tear the session down: release the persistence handle per its
    /// discipline and close the broker channel. Safe to call more than once.
    pub async fn close(&self, reason: CloseReason) {
        {
            let mut state = self.state.write().await;
            if state.is_closing() {
                return;
            }
            *state = SessionState::Closing;
        }

        self.store.release().await;

        if let Some(channel) = self.channel.lock().await.take() {
            channel.close().await;
        }

        let final_state = match reason {
            CloseReason::Normal => SessionState::Closed,
            CloseReason::TransportError | CloseReason::Swept => SessionState::Terminated,
        };
        *self.state.write().await = final_state;

        tracing::info!(
            device = %self.identity.uid,
            username = %self.identity.username,
            ?reason,
            "Session closed"
        );
    }
}

/// Bridges broker deliveries onto the session's outbound transport,
/// encrypting when outbound encryption is configured.
pub struct OutboundSink {
    cipher: Option<Arc<FrameCipher>>,
    outbound: mpsc::Sender<String>,
}

impl OutboundSink {
    pub fn new(cipher: Option<Arc<FrameCipher>>, outbound: mpsc::Sender<String>) -> Self {
        Self { cipher, outbound }
    }
}

#[async_trait]
impl MessageSink for OutboundSink {
    async fn deliver(&self, payload: Vec<u8>) -> Result<(), SinkClosed> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        let frame = match &self.cipher {
            Some(cipher) => cipher.encrypt(&text),
            None => text,
        };
        self.outbound.send(frame).await.map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::DeviceLogConfig;
    use crate::persistence::MemoryDeviceStore;

    fn test_session() -> (Arc<Session>, mpsc::Receiver<String>, Arc<MemoryDeviceStore>) {
        let (tx, rx) = mpsc::channel(8);
        let store = Arc::new(MemoryDeviceStore::new());
        let session = Arc::new(Session::new(
            DeviceIdentity::new("dev1".into(), "soil-sensor".into()),
            store.clone(),
            tx,
            None,
            Arc::new(DeviceLogWriter::new(&DeviceLogConfig::default())),
        ));
        (session, rx, store)
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let (session, _rx, _store) = test_session();
        assert_eq!(session.state().await, SessionState::Authenticated);

        session.set_active().await;
        assert_eq!(session.state().await, SessionState::Active);
        assert!(session.is_live().await);

        session.close(CloseReason::Normal).await;
        assert_eq!(session.state().await, SessionState::Closed);
        assert!(!session.is_live().await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _rx, store) = test_session();
        session.set_active().await;

        session.close(CloseReason::Normal).await;
        session.close(CloseReason::TransportError).await;

        // Second close neither re-releases nor flips the terminal state
        assert_eq!(store.release_count(), 1);
        assert_eq!(session.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_transport_error_terminates() {
        let (session, _rx, _store) = test_session();
        session.set_active().await;
        session.close(CloseReason::TransportError).await;
        assert_eq!(session.state().await, SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_half_closed_detection() {
        let (session, rx, _store) = test_session();
        session.set_active().await;
        assert!(!session.is_half_closed().await);

        drop(rx);
        assert!(session.is_half_closed().await);
        assert!(!session.is_live().await);

        session.close(CloseReason::Swept).await;
        assert!(!session.is_half_closed().await);
    }

    #[tokio::test]
    async fn test_outbound_sink_encrypts_when_configured() {
        let cipher = Arc::new(FrameCipher::new("0123456789abcdef").unwrap());
        let (tx, mut rx) = mpsc::channel(8);
        let sink = OutboundSink::new(Some(cipher.clone()), tx);

        sink.deliver(b"{\"Reboot\":1}".to_vec()).await.unwrap();
        let frame = rx.recv().await.unwrap();
        assert_ne!(frame, "{\"Reboot\":1}");
        assert_eq!(cipher.decrypt(&frame).unwrap(), "{\"Reboot\":1}");
    }

    #[tokio::test]
    async fn test_outbound_sink_reports_closed_receiver() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let sink = OutboundSink::new(None, tx);
        assert!(sink.deliver(b"payload".to_vec()).await.is_err());
    }
}
