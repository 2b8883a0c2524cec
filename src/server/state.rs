use std::sync::Arc;

use crate::auth::CredentialVerifier;
use crate::broker::create_broker;
use crate::devicelog::DeviceLogWriter;
use crate::directory::MysqlDeviceDirectory;
use crate::dispatch::{HandlerRegistry, MessageDispatcher};
use crate::infrastructure::config::Settings;
use crate::infrastructure::crypto::FrameCipher;
use crate::infrastructure::error::GatewayError;
use crate::infrastructure::mysql::MysqlConnector;
use crate::persistence::MysqlStoreProvider;
use crate::session::{SessionManager, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub verifier: Arc<CredentialVerifier>,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub async fn new(settings: Settings) -> Result<Self, GatewayError> {
        // Key presence and size were validated at settings load; building the
        // cipher still fails closed rather than running unencrypted.
        let cipher = match settings.security.key.as_deref() {
            Some(key) if settings.security.encryption_enabled() => {
                Some(Arc::new(FrameCipher::new(key)?))
            }
            _ => None,
        };
        let inbound_cipher = settings
            .security
            .encrypt_inbound
            .then(|| cipher.clone())
            .flatten();
        let outbound_cipher = settings
            .security
            .encrypt_outbound
            .then(|| cipher.clone())
            .flatten();

        let connector = Arc::new(MysqlConnector::new(&settings.database).await?);
        let directory = Arc::new(MysqlDeviceDirectory::new(connector.pool().clone()));
        let verifier = Arc::new(CredentialVerifier::new(directory));

        let stores = Arc::new(MysqlStoreProvider::new(
            connector,
            settings.database.datetime_format.clone(),
        ));
        let broker = create_broker(&settings.broker)?;
        let device_log = Arc::new(DeviceLogWriter::new(&settings.device_log));

        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Arc::new(MessageDispatcher::new(
            HandlerRegistry::builtin(),
            inbound_cipher,
        ));
        let sessions = Arc::new(SessionManager::new(
            stores,
            broker,
            registry.clone(),
            dispatcher,
            device_log,
            outbound_cipher,
            settings.websocket.channel_buffer,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            verifier,
            sessions,
            registry,
        })
    }
}
