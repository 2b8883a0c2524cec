//! Typed persistence operations behind per-session handles.
//!
//! Handlers never see SQL or connections; they see the narrow operation set
//! below. Every operation appends its own server-assigned timestamp. All
//! writes are fire-and-forget from the dispatcher's perspective; only the
//! configuration read is awaited before its reply is formatted.

mod memory;
mod mysql;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::DeviceIdentity;
use crate::infrastructure::mysql::AcquireError;

pub use memory::{MemoryDeviceStore, MemoryStoreProvider, StampedRow, TelemetryRow};
pub use mysql::{MysqlDeviceStore, MysqlStoreProvider};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation attempted after the handle was released
    #[error("persistence handle already released")]
    Released,

    #[error("database operation failed: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Per-session persistence operations.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn read_configuration(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<String>, StoreError>;

    async fn write_configuration(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError>;

    async fn insert_telemetry(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError>;

    async fn insert_info(&self, identity: &DeviceIdentity, payload: &str)
        -> Result<(), StoreError>;

    async fn insert_status(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError>;

    /// Give the underlying handle back per its recorded discipline.
    /// Idempotent: releasing an already-released store is a no-op.
    async fn release(&self);
}

/// Hands out per-session stores; the acquisition path carries the
/// pool-then-standalone fallback policy.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn acquire_store(&self) -> Result<Arc<dyn DeviceStore>, AcquireError>;
}
