use std::sync::Arc;

use crate::infrastructure::crypto::FrameCipher;
use crate::session::Session;

use super::envelope::MessageEnvelope;
use super::registry::HandlerRegistry;
use super::COMMAND_NOT_IMPLEMENTED;

/// Routes each inbound frame to its handler.
///
/// Nothing escapes `dispatch`: every failure is logged and the socket keeps
/// operating. Parse failures are dropped silently toward the device; route
/// failures answer with the sentinel.
pub struct MessageDispatcher {
    registry: HandlerRegistry,
    inbound_cipher: Option<Arc<FrameCipher>>,
}

impl MessageDispatcher {
    pub fn new(registry: HandlerRegistry, inbound_cipher: Option<Arc<FrameCipher>>) -> Self {
        Self {
            registry,
            inbound_cipher,
        }
    }

    pub async fn dispatch(&self, session: &Session, frame: &str) {
        if frame.is_empty() {
            return;
        }

        let text = match &self.inbound_cipher {
            Some(cipher) => match cipher.decrypt(frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(
                        device = %session.identity().uid,
                        error = %e,
                        "Dropping frame that failed decryption"
                    );
                    return;
                }
            },
            None => frame.to_string(),
        };

        let envelope = match MessageEnvelope::parse(&text) {
            Some(envelope) => envelope,
            None => {
                tracing::debug!(
                    device = %session.identity().uid,
                    "Dropping frame that is not a single-key envelope"
                );
                return;
            }
        };

        session.touch().await;

        let handler = envelope.handler_key().and_then(|key| self.registry.get(key));
        let handler = match handler {
            Some(handler) => handler,
            None => {
                tracing::debug!(
                    device = %session.identity().uid,
                    kind = %envelope.kind(),
                    "No handler for message kind"
                );
                session.send_sentinel(COMMAND_NOT_IMPLEMENTED).await;
                return;
            }
        };

        // Frames that arrive once teardown has begun are not routed
        if !session.is_live().await {
            tracing::debug!(
                device = %session.identity().uid,
                kind = %envelope.kind(),
                "Dropping frame for session under teardown"
            );
            return;
        }

        if let Err(e) = handler.handle(session, envelope.body()).await {
            tracing::warn!(
                device = %session.identity().uid,
                kind = %envelope.kind(),
                error = %e,
                "Handler failed, frame effect lost"
            );
        }
    }
}
