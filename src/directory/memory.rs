use async_trait::async_trait;
use dashmap::DashMap;

use super::{DeviceDirectory, DeviceRecord, DirectoryError};

/// In-memory directory for tests and standalone runs.
#[derive(Default)]
pub struct MemoryDeviceDirectory {
    /// username -> (password, device uid)
    devices: DashMap<String, (String, String)>,
}

impl MemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, username: &str, password: &str, uid: &str) {
        self.devices
            .insert(username.to_string(), (password.to_string(), uid.to_string()));
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDeviceDirectory {
    async fn lookup(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<DeviceRecord>, DirectoryError> {
        Ok(self.devices.get(username).and_then(|entry| {
            let (stored_password, uid) = entry.value();
            if stored_password == password {
                Some(DeviceRecord {
                    uid: uid.clone(),
                    username: username.to_string(),
                })
            } else {
                None
            }
        }))
    }
}
