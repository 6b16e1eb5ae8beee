//! Last-applied configuration baseline

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::errors::StackError;
use crate::filesys::file::File;

/// Holds the last successfully applied configuration in memory and on disk.
///
/// Diffs are taken against this baseline; it only moves forward when a run
/// succeeds.
pub struct BaselineStore {
    file: Option<File>,
    current: RwLock<Option<Value>>,
}

impl BaselineStore {
    /// In-memory only store
    pub fn in_memory(initial: Option<Value>) -> Self {
        Self {
            file: None,
            current: RwLock::new(initial),
        }
    }

    /// Load the baseline from `file`, if present
    pub async fn load(file: File) -> Result<Self, StackError> {
        let current = if file.exists().await {
            match file.read_json::<Value>().await {
                Ok(value) => {
                    info!("Loaded last applied configuration from {}", file.path().display());
                    Some(value)
                }
                Err(e) => {
                    warn!("Ignoring unreadable baseline {}: {}", file.path().display(), e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            file: Some(file),
            current: RwLock::new(current),
        })
    }

    pub async fn get(&self) -> Option<Value> {
        self.current.read().await.clone()
    }

    /// Replace the baseline, persisting it before it becomes visible
    pub async fn save(&self, config: &Value) -> Result<(), StackError> {
        let mut current = self.current.write().await;
        if let Some(file) = &self.file {
            file.write_json(config).await?;
        }
        *current = Some(config.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("last-applied.json");

        let store = BaselineStore::load(File::new(&path)).await.unwrap();
        assert!(store.get().await.is_none());

        let config = json!({ "paths": { "pool": "/mnt/pool" } });
        store.save(&config).await.unwrap();
        assert_eq!(store.get().await, Some(config.clone()));

        let reloaded = BaselineStore::load(File::new(&path)).await.unwrap();
        assert_eq!(reloaded.get().await, Some(config));
    }

    #[tokio::test]
    async fn test_corrupt_baseline_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last-applied.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = BaselineStore::load(File::new(&path)).await.unwrap();
        assert!(store.get().await.is_none());
    }
}
