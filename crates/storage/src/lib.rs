//! Object storage abstraction and backends for Hodie.
//!
//! Uploaded documents are written here before their upload record is
//! created, so a record only ever points at bytes that are already durable.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;

use hodie_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}
