//! Built-in message handlers. Each is a stateless strategy selected by
//! exact name match; persistence writes are at-most-once and never retried.

use async_trait::async_trait;
use serde_json::Value;

use crate::session::Session;

use super::registry::{HandlerError, MessageHandler};

/// `Config`: store the device's configuration payload.
pub struct ConfigHandler;

#[async_trait]
impl MessageHandler for ConfigHandler {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError> {
        session
            .store()
            .write_configuration(session.identity(), &body.to_string())
            .await?;
        Ok(())
    }
}

/// `ConfigGet` (command): read the stored configuration and reply
/// `{"Config":<raw text>}`. The read completes before the reply is
/// formatted; an empty or absent configuration yields `{"Config":""}`.
pub struct ConfigGetHandler;

#[async_trait]
impl MessageHandler for ConfigGetHandler {
    async fn handle(&self, session: &Session, _body: &Value) -> Result<(), HandlerError> {
        let stored = session
            .store()
            .read_configuration(session.identity())
            .await?;

        let reply = match stored {
            Some(text) if !text.is_empty() => format!("{{\"Config\":{}}}", text),
            _ => "{\"Config\":\"\"}".to_string(),
        };
        session.send_reply(reply).await;
        Ok(())
    }
}

/// `Data`: telemetry row with a unix-epoch timestamp.
pub struct DataHandler;

#[async_trait]
impl MessageHandler for DataHandler {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError> {
        session
            .store()
            .insert_telemetry(session.identity(), &body.to_string())
            .await?;
        Ok(())
    }
}

/// `Info`: free-form info row with a formatted timestamp.
pub struct InfoHandler;

#[async_trait]
impl MessageHandler for InfoHandler {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError> {
        session
            .store()
            .insert_info(session.identity(), &body.to_string())
            .await?;
        Ok(())
    }
}

/// `Status`: status row with a formatted timestamp.
pub struct StatusHandler;

#[async_trait]
impl MessageHandler for StatusHandler {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError> {
        session
            .store()
            .insert_status(session.identity(), &body.to_string())
            .await?;
        Ok(())
    }
}

/// `Log`: the first key of the body is the log level, its value the
/// message; appended to the device's log file.
pub struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, session: &Session, body: &Value) -> Result<(), HandlerError> {
        let entries = body
            .as_object()
            .ok_or(HandlerError::Payload("log body must be an object"))?;
        let (level, message) = entries
            .iter()
            .next()
            .ok_or(HandlerError::Payload("log body is empty"))?;

        let message = match message {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };

        session
            .device_log()
            .append(&session.identity().username, level, &message)
            .await?;
        Ok(())
    }
}
