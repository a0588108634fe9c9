//! Flat directory blob storage keyed by content id.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

/// One managed directory of blobs. Filenames are the hyphenated content id
/// with no extension, so keys can never escape the directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    kind: &'static str,
}

impl BlobStore {
    /// Open a blob directory, creating it if needed.
    pub async fn open(root: impl AsRef<Path>, kind: &'static str) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, kind })
    }

    /// Directory this store manages.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the blob for `id`.
    pub fn path(&self, id: Uuid) -> PathBuf {
        self.root.join(id.hyphenated().to_string())
    }

    /// Write a whole buffer, replacing any existing blob.
    #[instrument(skip(self, bytes), fields(store = self.kind, size = bytes.len()))]
    pub async fn write(&self, id: Uuid, bytes: &[u8]) -> std::io::Result<()> {
        fs::write(self.path(id), bytes).await?;
        debug!(%id, "Blob written");
        Ok(())
    }

    /// Read a whole blob into memory.
    pub async fn read(&self, id: Uuid) -> std::io::Result<Vec<u8>> {
        fs::read(self.path(id)).await
    }

    /// Read a blob, treating a missing file as `None`.
    pub async fn read_optional(&self, id: Uuid) -> std::io::Result<Option<Vec<u8>>> {
        match fs::read(self.path(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete a blob. Returns `false` when there was nothing to delete.
    #[instrument(skip(self), fields(store = self.kind))]
    pub async fn delete(&self, id: Uuid) -> std::io::Result<bool> {
        match fs::remove_file(self.path(id)).await {
            Ok(()) => {
                debug!(%id, "Blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path().join("blobs"), "primary").await.unwrap();
        let id = Uuid::now_v7();

        assert_eq!(store.read_optional(id).await.unwrap(), None);
        store.write(id, b"hello").await.unwrap();
        assert_eq!(store.read(id).await.unwrap(), b"hello");

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert_eq!(store.read_optional(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_filename_has_no_extension() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), "primary").await.unwrap();
        let id = Uuid::now_v7();

        let path = store.path(id);
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), id.to_string());
        assert!(path.extension().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::open(dir.path(), "preview").await.unwrap();
        let id = Uuid::now_v7();

        store.write(id, b"first version").await.unwrap();
        store.write(id, b"second").await.unwrap();
        assert_eq!(store.read(id).await.unwrap(), b"second");
    }
}
