//! Inbound message classification and dispatch.

mod dispatcher;
mod envelope;
mod handlers;
mod registry;

pub use dispatcher::MessageDispatcher;
pub use envelope::MessageEnvelope;
pub use handlers::{
    ConfigGetHandler, ConfigHandler, DataHandler, InfoHandler, LogHandler, StatusHandler,
};
pub use registry::{HandlerError, HandlerRegistry, MessageHandler};

/// Sent when no handler matches the resolved name.
pub const COMMAND_NOT_IMPLEMENTED: &str = "COMMAND_NOT_IMPLEMENTED";

/// Sent when persistence acquisition fails during session setup.
pub const TOO_MANY_CONNECTIONS: &str = "TOO_MANY_CONNECTIONS";
