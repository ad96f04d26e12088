use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::CameraRecord;
use crate::error::RegistryError;

/// Cameras keyed by MAC. No lock is held across I/O; callers copy out what
/// they need and write back afterwards.
#[derive(Default)]
pub struct CameraRegistry {
    cameras: RwLock<HashMap<String, CameraRecord>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record with the same id.
    pub async fn insert(&self, record: CameraRecord) {
        self.cameras.write().await.insert(record.id.clone(), record);
    }

    pub async fn remove(&self, id: &str) -> Result<CameraRecord, RegistryError> {
        let mut cameras = self.cameras.write().await;
        let mut record = cameras
            .remove(id)
            .ok_or_else(|| RegistryError::CameraNotFound(id.to_string()))?;
        record.disconnect();
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<CameraRecord, RegistryError> {
        self.cameras
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::CameraNotFound(id.to_string()))
    }

    /// Snapshot sorted by name, then id.
    pub async fn list(&self) -> Vec<CameraRecord> {
        let mut records: Vec<_> = self.cameras.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// `(online, total)`
    pub async fn counts(&self) -> (usize, usize) {
        let cameras = self.cameras.read().await;
        let online = cameras.values().filter(|c| c.online).count();
        (online, cameras.len())
    }

    pub async fn len(&self) -> usize {
        self.cameras.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cameras.read().await.is_empty()
    }

    /// Updates the cached online flag; `last_seen` advances only when online.
    pub async fn set_online(&self, id: &str, online: bool, seen_at: DateTime<Utc>) -> bool {
        let mut cameras = self.cameras.write().await;
        match cameras.get_mut(id) {
            Some(record) => {
                record.online = online;
                if online {
                    record.last_seen = seen_at;
                }
                true
            }
            None => false,
        }
    }

    /// Stores a P2P token fetched outside the lock.
    pub async fn mark_connected(&self, id: &str, token: String) -> Result<CameraRecord, RegistryError> {
        let mut cameras = self.cameras.write().await;
        let record = cameras
            .get_mut(id)
            .ok_or_else(|| RegistryError::CameraNotFound(id.to_string()))?;
        record.connect(token);
        Ok(record.clone())
    }

    /// Disconnects every camera and empties the registry.
    pub async fn clear(&self) -> usize {
        let mut cameras = self.cameras.write().await;
        let count = cameras.len();
        for record in cameras.values_mut() {
            record.disconnect();
        }
        cameras.clear();
        count
    }
}
