//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Durable key/value storage for upload bytes.
///
/// Keys are `/`-separated relative paths such as
/// `uploads/HDL-00001/<sha256>`. Writes are atomic: a reader sees either the
/// previous object or the complete new one, never a partial write.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read an object fully into memory.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any previous value. Returns once the data
    /// is durable.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Short backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable and writable.
    ///
    /// Called at startup and from the health endpoint.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
