use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub device_log: DeviceLogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub name: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    /// strftime pattern for the formatted timestamps written by the
    /// configuration/info/status operations.
    #[serde(default = "default_sql_datetime_format")]
    pub datetime_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// "redis" or "memory"
    #[serde(default = "default_broker_backend")]
    pub backend: String,
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_retry_interval")]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Decrypt inbound frames before dispatch
    #[serde(default)]
    pub encrypt_inbound: bool,
    /// Encrypt payload-bearing replies and broker deliveries
    #[serde(default)]
    pub encrypt_outbound: bool,
    /// 128-bit key, required when either toggle is on
    pub key: Option<String>,
}

impl SecurityConfig {
    pub fn encryption_enabled(&self) -> bool {
        self.encrypt_inbound || self.encrypt_outbound
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Interval of the half-closed-socket sweep in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    /// Outbound frame channel depth per connection
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceLogConfig {
    #[serde(default = "default_device_log_path")]
    pub base_path: String,
    #[serde(default = "default_device_log_date_format")]
    pub date_format: String,
    #[serde(default = "default_device_log_datetime_format")]
    pub datetime_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    10
}

fn default_sql_datetime_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_broker_backend() -> String {
    "redis".to_string()
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broker_port() -> u16 {
    6379
}

fn default_broker_retry_interval() -> u64 {
    5
}

fn default_queue_prefix() -> String {
    "device".to_string()
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_channel_buffer() -> usize {
    32
}

fn default_device_log_path() -> String {
    "logs/devices".to_string()
}

fn default_device_log_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_device_log_datetime_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("broker.backend", "redis")?
            .set_default("broker.host", "127.0.0.1")?
            .set_default("broker.port", 6379)?
            .set_default("broker.retry_interval_seconds", 5)?
            .set_default("websocket.sweep_interval", 30)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // SERVER_PORT, DATABASE_HOST, BROKER_HOST, SECURITY_KEY, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;

        Ok(settings)
    }

    /// Startup-time validation. A missing or wrong-size encryption key while
    /// encryption is enabled must fail the process, never a connection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.encryption_enabled() {
            match self.security.key.as_deref() {
                None => {
                    return Err(ConfigError::Message(
                        "security.key is required when frame encryption is enabled".into(),
                    ))
                }
                Some(key) if key.len() != 16 => {
                    return Err(ConfigError::Message(
                        "security.key must be exactly 16 bytes (AES-128)".into(),
                    ))
                }
                Some(_) => {}
            }
        }

        if self.broker.backend != "redis" && self.broker.backend != "memory" {
            return Err(ConfigError::Message(format!(
                "unknown broker backend: {}",
                self.broker.backend
            )));
        }

        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: default_broker_backend(),
            host: default_broker_host(),
            port: default_broker_port(),
            retry_interval_seconds: default_broker_retry_interval(),
            queue_prefix: default_queue_prefix(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl Default for DeviceLogConfig {
    fn default() -> Self {
        Self {
            base_path: default_device_log_path(),
            date_format: default_device_log_date_format(),
            datetime_format: default_device_log_datetime_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        Settings {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                host: "localhost".into(),
                user: "gateway".into(),
                password: "gateway".into(),
                name: "devices".into(),
                pool_size: default_pool_size(),
                connect_timeout_seconds: default_connect_timeout(),
                datetime_format: default_sql_datetime_format(),
            },
            broker: BrokerConfig::default(),
            security: SecurityConfig::default(),
            websocket: WebSocketConfig::default(),
            device_log: DeviceLogConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);

        let ws = WebSocketConfig::default();
        assert_eq!(ws.sweep_interval, 30);
    }

    #[test]
    fn test_validate_accepts_disabled_encryption() {
        let settings = test_settings();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_key() {
        let mut settings = test_settings();
        settings.security.encrypt_inbound = true;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_key() {
        let mut settings = test_settings();
        settings.security.encrypt_outbound = true;
        settings.security.key = Some("too-short".into());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_full_key() {
        let mut settings = test_settings();
        settings.security.encrypt_inbound = true;
        settings.security.key = Some("0123456789abcdef".into());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_broker_url() {
        let broker = BrokerConfig {
            host: "10.0.0.5".into(),
            port: 6379,
            ..Default::default()
        };
        assert_eq!(broker.url(), "redis://10.0.0.5:6379");
    }
}
