//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::StackError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Directories under the data dir
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Persisted orchestrator state
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("state"))
    }

    /// The last successfully applied configuration
    pub fn last_applied_file(&self) -> File {
        self.state_dir().file("last-applied.json")
    }

    /// Rendered compose and env artifacts
    pub fn deploy_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deploy"))
    }

    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Create the directories
    pub async fn setup(&self) -> Result<(), StackError> {
        self.state_dir().create().await?;
        self.deploy_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.setup().await.unwrap();
        assert!(layout.state_dir().exists().await);
        assert!(layout.deploy_dir().exists().await);
        assert!(layout.logs_dir().exists().await);
        assert!(layout.last_applied_file().path().ends_with("state/last-applied.json"));
    }
}
