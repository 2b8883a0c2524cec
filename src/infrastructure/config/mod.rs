mod settings;

pub use settings::{
    BrokerConfig, DatabaseConfig, DeviceLogConfig, SecurityConfig, ServerConfig, Settings,
    WebSocketConfig,
};
