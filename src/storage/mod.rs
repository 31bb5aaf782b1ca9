use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::errors::Result;

pub mod local;

pub use local::LocalStorage;

/// Flat key/value file store for uploaded images. Keys are bare filenames.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn store(&self, key: &str, data: &[u8]) -> Result<()>;

    /// `Ok(false)` when there was nothing to delete.
    async fn delete(&self, key: &str) -> Result<bool>;
}

pub fn create_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    let storage = LocalStorage::new(&config.upload_dir)?;
    Ok(Arc::new(storage))
}
