use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tokio::sync::Mutex;

use crate::auth::DeviceIdentity;
use crate::infrastructure::mysql::{AcquireError, DbHandle, MysqlConnector, ReleaseDiscipline};

use super::{DeviceStore, StoreError, StoreProvider};

/// Session-scoped store over an acquired [`DbHandle`].
///
/// The handle lives inside an `Option` so release happens exactly once no
/// matter how many teardown paths reach it.
pub struct MysqlDeviceStore {
    handle: Mutex<Option<DbHandle>>,
    datetime_format: String,
}

impl MysqlDeviceStore {
    pub fn new(handle: DbHandle, datetime_format: String) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
            datetime_format,
        }
    }

    /// Release discipline of the held handle, `None` once released.
    pub async fn discipline(&self) -> Option<ReleaseDiscipline> {
        self.handle.lock().await.as_ref().map(|h| h.discipline())
    }

    fn stamp(&self) -> String {
        Utc::now().format(&self.datetime_format).to_string()
    }
}

#[async_trait]
impl DeviceStore for MysqlDeviceStore {
    async fn read_configuration(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Option<String>, StoreError> {
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or(StoreError::Released)?;

        let row = sqlx::query(
            "SELECT d.configuration \
             FROM devices d \
             JOIN user_credentials uc ON uc.device_id = d.id \
             WHERE uc.username = ?",
        )
        .bind(&identity.username)
        .fetch_optional(handle.connection())
        .await?;

        match row {
            Some(row) => Ok(row.try_get::<Option<String>, _>("configuration")?),
            None => Ok(None),
        }
    }

    async fn write_configuration(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        let stamp = self.stamp();
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or(StoreError::Released)?;

        sqlx::query(
            "UPDATE devices d \
             JOIN user_credentials uc ON uc.device_id = d.id \
             SET d.configuration = ?, d.updated_at = ? \
             WHERE uc.username = ?",
        )
        .bind(payload)
        .bind(&stamp)
        .bind(&identity.username)
        .execute(handle.connection())
        .await?;

        Ok(())
    }

    async fn insert_telemetry(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        let stamp = Utc::now().timestamp();
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or(StoreError::Released)?;

        sqlx::query("INSERT INTO tmp_device_data (device_uid, data, created_at) VALUES (?, ?, ?)")
            .bind(&identity.uid)
            .bind(payload)
            .bind(stamp)
            .execute(handle.connection())
            .await?;

        Ok(())
    }

    async fn insert_info(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        let stamp = self.stamp();
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or(StoreError::Released)?;

        sqlx::query("INSERT INTO device_info (device_uid, message, created_at) VALUES (?, ?, ?)")
            .bind(&identity.uid)
            .bind(payload)
            .bind(&stamp)
            .execute(handle.connection())
            .await?;

        Ok(())
    }

    async fn insert_status(
        &self,
        identity: &DeviceIdentity,
        payload: &str,
    ) -> Result<(), StoreError> {
        let stamp = self.stamp();
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or(StoreError::Released)?;

        sqlx::query("INSERT INTO device_status (device_uid, message, created_at) VALUES (?, ?, ?)")
            .bind(&identity.uid)
            .bind(payload)
            .bind(&stamp)
            .execute(handle.connection())
            .await?;

        Ok(())
    }

    async fn release(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            let discipline = handle.discipline();
            handle.release().await;
            tracing::debug!(?discipline, "Persistence handle released");
        }
    }
}

/// Store provider over the shared MySQL connector.
pub struct MysqlStoreProvider {
    connector: Arc<MysqlConnector>,
    datetime_format: String,
}

impl MysqlStoreProvider {
    pub fn new(connector: Arc<MysqlConnector>, datetime_format: String) -> Self {
        Self {
            connector,
            datetime_format,
        }
    }
}

#[async_trait]
impl StoreProvider for MysqlStoreProvider {
    async fn acquire_store(&self) -> Result<Arc<dyn DeviceStore>, AcquireError> {
        let handle = self.connector.acquire().await?;
        Ok(Arc::new(MysqlDeviceStore::new(
            handle,
            self.datetime_format.clone(),
        )))
    }
}
