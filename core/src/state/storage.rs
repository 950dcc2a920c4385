//! Durable storage used for synced mod variables

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::errors::StorageError;
use crate::types::JsonObject;

/// Emitted whenever a stored key actually changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
}

#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Values for the requested keys; absent keys are omitted
    async fn get(&self, keys: &[String]) -> Result<JsonObject, StorageError>;

    async fn set(&self, entries: JsonObject) -> Result<(), StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Process-local storage, the default backend and the one tests use
#[derive(Debug)]
pub struct MemoryStorage {
    entries: Mutex<JsonObject>,
    changes: broadcast::Sender<StorageChange>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(JsonObject::new()),
            changes,
        }
    }

    pub async fn snapshot(&self) -> JsonObject {
        self.entries.lock().await.clone()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, keys: &[String]) -> Result<JsonObject, StorageError> {
        let entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, entries: JsonObject) -> Result<(), StorageError> {
        let mut stored = self.entries.lock().await;
        for (key, value) in entries {
            if stored.get(&key) == Some(&value) {
                continue;
            }
            stored.insert(key.clone(), value);
            // No receivers is fine
            let _ = self.changes.send(StorageChange { key });
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut stored = self.entries.lock().await;
        for key in std::mem::take(&mut *stored).keys() {
            let _ = self.changes.send(StorageChange { key: key.clone() });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}
