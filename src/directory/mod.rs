//! Device directory: resolves transport credentials to a known device.
//!
//! The directory is an external collaborator behind a stable interface; the
//! gateway only ever asks one question of it.

mod memory;
mod mysql;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryDeviceDirectory;
pub use mysql::MysqlDeviceDirectory;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Lookup(#[from] sqlx::Error),
}

/// A device as the directory knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub uid: String,
    pub username: String,
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Resolve a credential pair to a device, or `None` when no device
    /// matches. Timing characteristics of the lookup are the backing
    /// store's concern.
    async fn lookup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<DeviceRecord>, DirectoryError>;
}
