//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployerError;
use crate::filesys::file::File;

/// On-disk layout of the deployer's state directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all persisted state
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Durable job queue snapshot
    pub fn jobs_file(&self) -> File {
        File::new(self.base_dir.join("jobs.json"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployerError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/deployer")
    }
}
