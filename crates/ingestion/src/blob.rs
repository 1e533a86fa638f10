//! Raw upload storage
//!
//! Write-once, read-by-id object store for original document bytes.
//! Keeping the source bytes is what makes the rebuild path possible when
//! a collection has to be reindexed.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use presail_common::errors::{AppError, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, id: Uuid, bytes: &[u8]) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Vec<u8>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Filesystem-backed object store rooted at a configured directory
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.bin"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, id: Uuid, bytes: &[u8]) -> Result<()> {
        // Write then rename so readers never observe a partial object
        let tmp = self.root.join(format!("{id}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.path_for(id)).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::DocumentNotFound { id: id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
