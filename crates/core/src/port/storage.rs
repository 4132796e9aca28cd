// Storage Port (Interface)

use crate::error::Result;
use async_trait::async_trait;

/// Relative path inside the object storage, `/`-separated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoragePath(Vec<String>);

impl StoragePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn parse(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }
}

impl std::fmt::Display for StoragePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Binary storage handle passed to plugins
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn exists(&self, path: &StoragePath) -> Result<bool>;

    async fn read_binary(&self, path: &StoragePath) -> Result<Vec<u8>>;

    async fn write_binary(&self, path: &StoragePath, content: &[u8]) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryStorage {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl StorageService for InMemoryStorage {
        async fn exists(&self, path: &StoragePath) -> Result<bool> {
            Ok(self.blobs.lock().unwrap().contains_key(&path.to_string()))
        }

        async fn read_binary(&self, path: &StoragePath) -> Result<Vec<u8>> {
            self.blobs
                .lock()
                .unwrap()
                .get(&path.to_string())
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("binary {}", path)))
        }

        async fn write_binary(&self, path: &StoragePath, content: &[u8]) -> Result<()> {
            self.blobs
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_vec());
            Ok(())
        }
    }
}
