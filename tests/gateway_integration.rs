//! Cross-component integration tests
//!
//! These tests wire the session manager, dispatcher, and memory backends
//! together and drive the same paths the WebSocket handler does, without
//! requiring a MySQL or Redis instance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tokio::sync::mpsc;

use agrolink_gateway::auth::{CredentialVerifier, DeviceIdentity};
use agrolink_gateway::broker::{Broker, BrokerChannel, BrokerError, MemoryBroker, MessageSink};
use agrolink_gateway::config::DeviceLogConfig;
use agrolink_gateway::crypto::{device_uid, FrameCipher};
use agrolink_gateway::devicelog::DeviceLogWriter;
use agrolink_gateway::directory::MemoryDeviceDirectory;
use agrolink_gateway::dispatch::{HandlerRegistry, MessageDispatcher, COMMAND_NOT_IMPLEMENTED};
use agrolink_gateway::persistence::{MemoryStoreProvider, StoreProvider};
use agrolink_gateway::session::{CloseReason, SessionManager, SessionRegistry, SessionState};

/// Broker wrapper that counts opened channels.
struct CountingBroker {
    inner: MemoryBroker,
    opened: AtomicUsize,
}

impl CountingBroker {
    fn new() -> Self {
        Self {
            inner: MemoryBroker::new(),
            opened: AtomicUsize::new(0),
        }
    }

    fn opened_channels(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for CountingBroker {
    async fn open_channel(
        &self,
        device_uid: &str,
        sink: Arc<dyn MessageSink>,
    ) -> Result<BrokerChannel, BrokerError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.inner.open_channel(device_uid, sink).await
    }

    async fn publish(&self, device_uid: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.publish(device_uid, payload).await
    }
}

struct TestEnvironment {
    manager: Arc<SessionManager>,
    registry: Arc<SessionRegistry>,
    broker: Arc<CountingBroker>,
    provider: Arc<MemoryStoreProvider>,
    log_dir: tempfile::TempDir,
}

fn create_environment(
    store_capacity: Option<usize>,
    inbound_cipher: Option<Arc<FrameCipher>>,
    outbound_cipher: Option<Arc<FrameCipher>>,
) -> TestEnvironment {
    let log_dir = tempfile::tempdir().unwrap();
    let device_log = Arc::new(DeviceLogWriter::new(&DeviceLogConfig {
        base_path: log_dir.path().to_string_lossy().into_owned(),
        date_format: "%Y-%m-%d".into(),
        datetime_format: "%Y-%m-%d %H:%M:%S".into(),
    }));

    let provider = Arc::new(MemoryStoreProvider::with_capacity(store_capacity));
    let broker = Arc::new(CountingBroker::new());
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::new(
        HandlerRegistry::builtin(),
        inbound_cipher,
    ));

    let manager = Arc::new(SessionManager::new(
        provider.clone() as Arc<dyn StoreProvider>,
        broker.clone() as Arc<dyn Broker>,
        registry.clone(),
        dispatcher,
        device_log,
        outbound_cipher,
        32,
    ));

    TestEnvironment {
        manager,
        registry,
        broker,
        provider,
        log_dir,
    }
}

fn identity(username: &str) -> DeviceIdentity {
    DeviceIdentity::new(username.to_string(), "soil-sensor".to_string())
}

async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound channel closed")
}

#[tokio::test]
async fn test_data_envelope_inserts_telemetry() {
    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    let before = Utc::now().timestamp();
    env.manager
        .inbound(&session, r#"{"Data":{"t":21.5}}"#)
        .await;

    let stores = env.provider.stores().await;
    let rows = stores[0].telemetry_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].device_uid, device_uid("dev1"));
    assert_eq!(rows[0].payload, r#"{"t":21.5}"#);
    assert!((rows[0].created_at - before).abs() <= 1);
}

#[tokio::test]
async fn test_unknown_kind_sends_sentinel_and_nothing_else() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"Mystery":{"x":1}}"#)
        .await;

    assert_eq!(recv_frame(&mut rx).await, COMMAND_NOT_IMPLEMENTED);

    let stores = env.provider.stores().await;
    assert!(stores[0].telemetry_rows().await.is_empty());
    assert!(stores[0].info_rows().await.is_empty());
    assert!(stores[0].status_rows().await.is_empty());
}

#[tokio::test]
async fn test_unknown_command_sends_sentinel() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"command":"SelfDestruct"}"#)
        .await;

    assert_eq!(recv_frame(&mut rx).await, COMMAND_NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped_silently() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager.inbound(&session, "").await;
    env.manager.inbound(&session, "not json").await;
    env.manager.inbound(&session, "[1,2,3]").await;
    env.manager.inbound(&session, r#"{"A":1,"B":2}"#).await;

    // Nothing came back and nothing was stored
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );
    let stores = env.provider.stores().await;
    assert!(stores[0].telemetry_rows().await.is_empty());
}

#[tokio::test]
async fn test_config_roundtrip() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"Config":{"interval":60,"unit":"c"}}"#)
        .await;
    env.manager
        .inbound(&session, r#"{"command":"ConfigGet"}"#)
        .await;

    let reply = recv_frame(&mut rx).await;
    assert_eq!(reply, r#"{"Config":{"interval":60,"unit":"c"}}"#);
}

#[tokio::test]
async fn test_config_get_with_nothing_stored() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"command":"ConfigGet"}"#)
        .await;

    assert_eq!(recv_frame(&mut rx).await, r#"{"Config":""}"#);
}

#[tokio::test]
async fn test_log_envelope_writes_device_log() {
    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"Log":{"warn":"low battery"}}"#)
        .await;

    let file = env
        .log_dir
        .path()
        .join("dev1")
        .join(format!("{}.log", Utc::now().format("%Y-%m-%d")));
    let contents = std::fs::read_to_string(file).unwrap();
    assert!(contents.contains("[warn] low battery"));
}

#[tokio::test]
async fn test_info_and_status_envelopes_insert_rows() {
    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"Info":{"fw":"2.1.0"}}"#)
        .await;
    env.manager
        .inbound(&session, r#"{"Status":{"battery":80}}"#)
        .await;

    let stores = env.provider.stores().await;
    let info = stores[0].info_rows().await;
    let status = stores[0].status_rows().await;
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].payload, r#"{"fw":"2.1.0"}"#);
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].device_uid, device_uid("dev1"));
}

#[tokio::test]
async fn test_capacity_exhaustion_rejects_without_broker_channel() {
    let env = create_environment(Some(0), None, None);

    let result = env.manager.open(identity("dev1")).await;
    assert!(result.is_err());

    // No session materialized, no channel ever opened
    assert!(env.registry.is_empty());
    assert_eq!(env.broker.opened_channels(), 0);
}

#[tokio::test]
async fn test_frames_after_teardown_are_not_routed() {
    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager.close(&session, CloseReason::Normal).await;
    env.manager
        .inbound(&session, r#"{"Data":{"t":21.5}}"#)
        .await;

    let stores = env.provider.stores().await;
    assert!(stores[0].telemetry_rows().await.is_empty());
}

#[tokio::test]
async fn test_close_releases_exactly_once() {
    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager.close(&session, CloseReason::Normal).await;
    env.manager.close(&session, CloseReason::Normal).await;
    session.close(CloseReason::TransportError).await;

    let stores = env.provider.stores().await;
    assert_eq!(stores[0].release_count(), 1);
    assert_eq!(session.state().await, SessionState::Closed);
    assert!(env.registry.is_empty());
}

#[tokio::test]
async fn test_broker_delivery_reaches_outbound_channel() {
    let env = create_environment(None, None, None);
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.broker
        .publish(&device_uid("dev1"), br#"{"Reboot":1}"#)
        .await
        .unwrap();

    assert_eq!(recv_frame(&mut rx).await, r#"{"Reboot":1}"#);
    env.manager.close(&session, CloseReason::Normal).await;
}

#[tokio::test]
async fn test_encrypted_inbound_frame_is_dispatched() {
    let cipher = Arc::new(FrameCipher::new("0123456789abcdef").unwrap());
    let env = create_environment(None, Some(cipher.clone()), None);
    let (session, _rx) = env.manager.open(identity("dev1")).await.unwrap();

    let frame = cipher.encrypt(r#"{"Data":{"t":3.2}}"#);
    env.manager.inbound(&session, &frame).await;

    let stores = env.provider.stores().await;
    let rows = stores[0].telemetry_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, r#"{"t":3.2}"#);
}

#[tokio::test]
async fn test_encrypted_outbound_reply() {
    let cipher = Arc::new(FrameCipher::new("0123456789abcdef").unwrap());
    let env = create_environment(None, None, Some(cipher.clone()));
    let (session, mut rx) = env.manager.open(identity("dev1")).await.unwrap();

    env.manager
        .inbound(&session, r#"{"Config":{"interval":60}}"#)
        .await;
    env.manager
        .inbound(&session, r#"{"command":"ConfigGet"}"#)
        .await;

    let frame = recv_frame(&mut rx).await;
    assert_ne!(frame, r#"{"Config":{"interval":60}}"#);
    assert_eq!(
        cipher.decrypt(&frame).unwrap(),
        r#"{"Config":{"interval":60}}"#
    );
}

#[tokio::test]
async fn test_verifier_threads_identity_into_session() {
    let directory = MemoryDeviceDirectory::new();
    directory.insert("dev1", "secret", "uid-1");
    let verifier = CredentialVerifier::new(Arc::new(directory));

    let mut headers = HeaderMap::new();
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static("soil-sensor/1.4"),
    );
    headers.insert(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Basic {}", BASE64.encode("dev1:secret"))).unwrap(),
    );

    let verified = verifier.verify(&headers).await.unwrap();
    assert_eq!(verified.uid, device_uid("dev1"));

    let env = create_environment(None, None, None);
    let (session, _rx) = env.manager.open(verified).await.unwrap();
    assert_eq!(session.identity().username, "dev1");
    assert_eq!(session.identity().uid, device_uid("dev1"));
}
