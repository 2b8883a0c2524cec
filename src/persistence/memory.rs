//! In-memory store used by tests and standalone runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::auth::DeviceIdentity;
use crate::infrastructure::mysql::AcquireError;

use super::{DeviceStore, StoreError, StoreProvider};

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRow {
    pub device_uid: String,
    pub payload: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StampedRow {
    pub device_uid: String,
    pub payload: String,
    pub created_at: String,
}

#[derive(Default)]
pub struct MemoryDeviceStore {
    /// username -> stored configuration text
    configuration: DashMap<String, String>,
    telemetry: Mutex<Vec<TelemetryRow>>,
    info: Mutex<Vec<StampedRow>>,
    status: Mutex<Vec<StampedRow>>,
    released: AtomicBool,
    release_count: AtomicUsize,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn telemetry_rows(&self) -> Vec<TelemetryRow> {
        self.telemetry.lock().await.clone()
    }

    pub async fn info_rows(&self) -> Vec<StampedRow> {
        self.info.lock().await.clone()
    }

    pub async fn status_rows(&self) -> Vec<StampedRow> {
        self.status.lock().await.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }

    fn guard_released(&self) -> Result<(), StoreError> {
        if self.is_released() {
            Err(StoreError::Released)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn read_configuration(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<String>, StoreError> {
        self.guard_released()?;
        Ok(self
            .configuration
            .get(&identity.username)
            .map(|entry| entry.value().clone()))
    }

    async fn write_configuration(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.guard_released()?;
        self.configuration
            .insert(identity.username.clone(), payload.to_string());
        Ok(())
    }

    async fn insert_telemetry(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.guard_released()?;
        self.telemetry.lock().await.push(TelemetryRow {
            device_uid: identity.uid.clone(),
            payload: payload.to_string(),
            created_at: Utc::now().timestamp(),
        });
        Ok(())
    }

    async fn insert_info(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.guard_released()?;
        self.info.lock().await.push(StampedRow {
            device_uid: identity.uid.clone(),
            payload: payload.to_string(),
            created_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        Ok(())
    }

    async fn insert_status(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.guard_released()?;
        self.status.lock().await.push(StampedRow {
            device_uid: identity.uid.clone(),
            payload: payload.to_string(),
            created_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        });
        Ok(())
    }

    async fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.release_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Provider with an optional capacity limit, for exercising the
/// acquisition-failure path without a database.
pub struct MemoryStoreProvider {
    capacity: Option<usize>,
    acquired: AtomicUsize,
    stores: Mutex<Vec<Arc<MemoryDeviceStore>>>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            acquired: AtomicUsize::new(0),
            stores: Mutex::new(Vec::new()),
        }
    }

    /// Stores handed out so far, in acquisition order.
    pub async fn stores(&self) -> Vec<Arc<MemoryDeviceStore>> {
        self.stores.lock().await.clone()
    }
}

impl Default for MemoryStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn acquire_store(&self) -> Result<Arc<dyn DeviceStore>, AcquireError> {
        if let Some(limit) = self.capacity {
            if self.acquired.load(Ordering::SeqCst) >= limit {
                return Err(AcquireError::Unavailable(sqlx::Error::PoolTimedOut));
            }
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);

        let store = Arc::new(MemoryDeviceStore::new());
        self.stores.lock().await.push(store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("dev1".to_string(), "soil-sensor".to_string())
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = MemoryDeviceStore::new();
        store.release().await;
        store.release().await;
        assert_eq!(store.release_count(), 1);
    }

    #[tokio::test]
    async fn test_operations_fail_after_release() {
        let store = MemoryDeviceStore::new();
        store.release().await;
        let result = store.insert_telemetry(&identity(), "{}").await;
        assert!(matches!(result, Err(StoreError::Released)));
    }

    #[tokio::test]
    async fn test_provider_capacity_exhaustion() {
        let provider = MemoryStoreProvider::with_capacity(Some(1));
        assert!(provider.acquire_store().await.is_ok());
        assert!(matches!(
            provider.acquire_store().await,
            Err(AcquireError::Unavailable(_))
        ));
    }
}
