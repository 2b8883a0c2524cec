//! Per-device log files for device-originated `Log` messages.
//!
//! One directory per device, one file per day:
//! `{base}/{device}/{date}.log`, each line `"{datetime} [{level}] {message}"`.
//! This is device data, not application logging; the application itself logs
//! through `tracing`.

use std::path::PathBuf;

use chrono::Utc;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::infrastructure::config::DeviceLogConfig;

#[derive(Debug, Error)]
pub enum DeviceLogError {
    #[error("device log write failed: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DeviceLogWriter {
    base_path: PathBuf,
    date_format: String,
    datetime_format: String,
}

impl DeviceLogWriter {
    pub fn new(config: &DeviceLogConfig) -> Self {
        Self {
            base_path: PathBuf::from(&config.base_path),
            date_format: config.date_format.clone(),
            datetime_format: config.datetime_format.clone(),
        }
    }

    /// Append one log line for a device, creating the directory and the
    /// day's file as needed.
    pub async fn append(
        &self,
        device: &str,
        level: &str,
        message: &str,
    ) -> Result<(), DeviceLogError> {
        let now = Utc::now();

        let directory = self.base_path.join(device);
        tokio::fs::create_dir_all(&directory).await?;

        let file_path = directory.join(format!("{}.log", now.format(&self.date_format)));
        let line = format!(
            "{} [{}] {}\n",
            now.format(&self.datetime_format),
            level,
            message
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .await?;
        file.write_all(line.as_bytes()).await?;

        Ok(())
    }
}
