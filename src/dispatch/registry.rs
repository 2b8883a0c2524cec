use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::devicelog::DeviceLogError;
use crate::persistence::StoreError;
use crate::session::Session;

use super::handlers::{
    ConfigGetHandler, ConfigHandler, DataHandler, InfoHandler, LogHandler, StatusHandler,
};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("unusable payload: {0}")]
    Payload(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    DeviceLog(#[from] DeviceLogError),
}

/// A stateless strategy invoked with a session and a message body.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError>;
}

/// Immutable name -> handler map, fixed at process start.
///
/// Registration is explicit; resolution from an envelope is the two-step
/// command-vs-kind rule on [`MessageEnvelope`], then an exact,
/// case-sensitive lookup here.
///
/// [`MessageEnvelope`]: super::MessageEnvelope
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in handler set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Config", Arc::new(ConfigHandler));
        registry.register("ConfigGet", Arc::new(ConfigGetHandler));
        registry.register("Data", Arc::new(DataHandler));
        registry.register("Info", Arc::new(InfoHandler));
        registry.register("Status", Arc::new(StatusHandler));
        registry.register("Log", Arc::new(LogHandler));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
