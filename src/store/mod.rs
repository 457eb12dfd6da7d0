//! Negotiated configuration cache.
//!
//! One entry per plugin instance, overwritten wholesale on every save.
//!
//! - [`FileConfigStore`]: `config.<instance>.json` files in a directory
//! - [`MemoryConfigStore`]: process-local map, for tests and diskless hosts

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use crate::error::{ChatPlugError, Result};
use crate::protocol::ConfigurationResponse;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Key-value persistence for negotiated configuration.
pub trait ConfigStore: Send + Sync {
    /// Load the cached configuration for an instance.
    fn load<'a>(&'a self, instance_id: &'a str) -> StoreFuture<'a, Option<ConfigurationResponse>>;

    /// Replace the cached configuration for an instance.
    fn save<'a>(
        &'a self,
        instance_id: &'a str,
        config: &'a ConfigurationResponse,
    ) -> StoreFuture<'a, ()>;
}

/// JSON files in a directory
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    dir: PathBuf,
}

impl FileConfigStore {
    /// Store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for an instance
    pub fn path_for(&self, instance_id: &str) -> PathBuf {
        self.dir.join(format!("config.{instance_id}.json"))
    }
}

impl ConfigStore for FileConfigStore {
    fn load<'a>(&'a self, instance_id: &'a str) -> StoreFuture<'a, Option<ConfigurationResponse>> {
        Box::pin(async move {
            let path = self.path_for(instance_id);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };

            let config = serde_json::from_slice(&bytes).map_err(|e| {
                ChatPlugError::Config(format!("Corrupt cache file {}: {e}", path.display()))
            })?;
            Ok(Some(config))
        })
    }

    fn save<'a>(
        &'a self,
        instance_id: &'a str,
        config: &'a ConfigurationResponse,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;

            let path = self.path_for(instance_id);
            let tmp = self
                .dir
                .join(format!(".config.{instance_id}.{}.tmp", uuid::Uuid::new_v4()));
            let json = serde_json::to_vec(config)?;

            tokio::fs::write(&tmp, json).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }

            tracing::debug!(path = %path.display(), "configuration cached");
            Ok(())
        })
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: RwLock<HashMap<String, ConfigurationResponse>>,
}

impl MemoryConfigStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached instances
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load<'a>(&'a self, instance_id: &'a str) -> StoreFuture<'a, Option<ConfigurationResponse>> {
        Box::pin(async move {
            let entries = self
                .entries
                .read()
                .map_err(|_| ChatPlugError::Config("config store lock poisoned".to_string()))?;
            Ok(entries.get(instance_id).cloned())
        })
    }

    fn save<'a>(
        &'a self,
        instance_id: &'a str,
        config: &'a ConfigurationResponse,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| ChatPlugError::Config("config store lock poisoned".to_string()))?;
            entries.insert(instance_id.to_string(), config.clone());
            Ok(())
        })
    }
}
