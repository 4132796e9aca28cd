// Local filesystem storage collaborator
// reason: tokio::fs keeps blocking file IO off the runtime threads

use async_trait::async_trait;
use reliquary_core::error::{AppError, Result};
use reliquary_core::port::{StoragePath, StorageService};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// Storage rooted at a directory; every `StoragePath` resolves below it
pub struct FsStorageService {
    root: PathBuf,
}

impl FsStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Reject segments that could escape the root
    fn resolve(&self, path: &StoragePath) -> Result<PathBuf> {
        if path.segments().is_empty() {
            return Err(AppError::Storage("empty storage path".to_string()));
        }
        let mut resolved = self.root.clone();
        for segment in path.segments() {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\', '\0'])
            {
                return Err(AppError::Storage(format!("illegal path segment in {}", path)));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl StorageService for FsStorageService {
    async fn exists(&self, path: &StoragePath) -> Result<bool> {
        let resolved = self.resolve(path)?;
        tokio::fs::try_exists(&resolved)
            .await
            .map_err(|e| AppError::Storage(format!("{}: {}", path, e)))
    }

    async fn read_binary(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let resolved = self.resolve(path)?;
        match tokio::fs::read(&resolved).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("binary {}", path)))
            }
            Err(e) => Err(AppError::Storage(format!("{}: {}", path, e))),
        }
    }

    /// Written to a sibling temp file first, then renamed into place
    async fn write_binary(&self, path: &StoragePath, content: &[u8]) -> Result<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = resolved.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &resolved).await?;

        debug!(path = %path, bytes = content.len(), "Binary written");
        Ok(())
    }
}
