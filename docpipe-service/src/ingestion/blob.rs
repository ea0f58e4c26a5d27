//! Transient storage for uploaded source documents.
//!
//! A blob lives at `{blob_dir}/{document_id}` from upload until the finalize
//! stage removes it.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ProcessingError;

#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, document_id: &str) -> PathBuf {
        self.dir.join(document_id)
    }

    /// Write the source bytes of a document, returning the blob path
    pub async fn write(&self, document_id: &str, content: &[u8]) -> Result<PathBuf, ProcessingError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(ProcessingError::Io)?;

        let path = self.path_for(document_id);
        tokio::fs::write(&path, content)
            .await
            .map_err(ProcessingError::Io)?;

        debug!(doc_id = %document_id, path = %path.display(), bytes = content.len(), "Blob written");
        Ok(path)
    }

    /// Read a blob back for parsing
    pub async fn read(&self, path: &Path) -> Result<Bytes, ProcessingError> {
        tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(ProcessingError::Io)
    }

    /// Remove a blob. A blob that is already gone is not an error.
    pub async fn remove(&self, path: &Path) -> Result<(), ProcessingError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProcessingError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));

        let path = store.write("doc-1", b"raw bytes").await.unwrap();
        assert_eq!(path, store.path_for("doc-1"));
        assert_eq!(store.read(&path).await.unwrap(), Bytes::from_static(b"raw bytes"));

        store.remove(&path).await.unwrap();
        assert!(!path.exists());
        // Second removal is a no-op
        store.remove(&path).await.unwrap();
        assert!(store.read(&path).await.is_err());
    }
}
