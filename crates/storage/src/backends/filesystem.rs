//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path under the root.
    ///
    /// Runs on the blocking pool because it canonicalizes paths.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }
}

/// Map `key` to a path inside `root`.
///
/// Rejects anything other than plain relative components, then checks that
/// the deepest existing ancestor of the target (the target itself if it
/// exists) still resolves inside the root, so symlinks cannot redirect reads
/// or writes elsewhere.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!("invalid key: {key:?}")));
    }
    if !Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }

    let root_canonical = root.canonicalize()?;
    let path = root.join(key);

    let mut cursor = Some(path.as_path());
    while let Some(candidate) = cursor {
        match std::fs::symlink_metadata(candidate) {
            Ok(meta) => {
                let resolved = candidate.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !resolved.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "key escapes storage root: {key}"
                    )));
                }
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                cursor = candidate.parent();
            }
            Err(e) => return Err(StorageError::Io(e)),
        }
    }

    Ok(path)
}

fn not_found_or_io(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| not_found_or_io(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Unique temp name so concurrent writers to one key never share a file.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {}", self.root.display()),
            )));
        }

        Ok(())
    }
}
