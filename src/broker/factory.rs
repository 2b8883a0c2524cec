use std::sync::Arc;

use crate::infrastructure::config::BrokerConfig;

use super::{Broker, BrokerError, MemoryBroker, RedisBroker};

/// Select a broker backend from configuration.
pub fn create_broker(config: &BrokerConfig) -> Result<Arc<dyn Broker>, BrokerError> {
    match config.backend.as_str() {
        "redis" => {
            tracing::info!(url = %config.url(), "Using Redis broker backend");
            Ok(Arc::new(RedisBroker::new(config)?))
        }
        "memory" => {
            tracing::info!("Using in-memory broker backend");
            Ok(Arc::new(MemoryBroker::new()))
        }
        other => Err(BrokerError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_backend_is_rejected() {
        let config = BrokerConfig {
            backend: "kafka".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_broker(&config),
            Err(BrokerError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_memory_backend_selected() {
        let config = BrokerConfig {
            backend: "memory".into(),
            ..Default::default()
        };
        assert!(create_broker(&config).is_ok());
    }
}
