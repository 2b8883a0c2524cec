use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

use super::{DeviceDirectory, DeviceRecord, DirectoryError};

/// Directory backed by the relational store's credential tables.
pub struct MysqlDeviceDirectory {
    pool: MySqlPool,
}

impl MysqlDeviceDirectory {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceDirectory for MysqlDeviceDirectory {
    async fn lookup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<DeviceRecord>, DirectoryError> {
        let row = sqlx::query(
            "SELECT d.uid, uc.username \
             FROM user_credentials uc \
             JOIN devices d ON uc.device_id = d.id \
             WHERE uc.username = ? AND uc.password = ?",
        )
        .bind(username)
        .bind(password)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(DeviceRecord {
                uid: row.try_get("uid").map_err(DirectoryError::Lookup)?,
                username: row.try_get("username").map_err(DirectoryError::Lookup)?,
            })),
            None => Ok(None),
        }
    }
}
