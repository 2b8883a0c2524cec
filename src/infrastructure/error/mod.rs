use thiserror::Error;

use crate::broker::BrokerError;
use crate::infrastructure::crypto::CipherError;

/// Startup-scope errors. Per-connection and per-frame failures stay local to
/// their modules; only what can abort process initialization surfaces here.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
