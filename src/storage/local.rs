use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use url::Url;

use super::{ObjectPath, ObjectStore, StorageError};

/// Stores blobs under a directory and serves them from `public_base_url`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    public_base: Url,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Result<Self, StorageError> {
        let mut public_base = Url::parse(public_base_url)?;
        // Url::join drops the last segment unless the base ends in a slash
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }

        Ok(Self {
            root: root.into(),
            public_base,
        })
    }

    pub fn local_path(&self, path: &ObjectPath) -> PathBuf {
        self.root.join(path.as_str())
    }

    pub fn public_url(&self, path: &ObjectPath) -> Result<String, StorageError> {
        Ok(self.public_base.join(path.as_str())?.to_string())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &ObjectPath, data: Bytes) -> Result<String, StorageError> {
        let full_path = self.local_path(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, &data).await?;

        tracing::debug!("Stored {} ({} bytes)", path, data.len());
        self.public_url(path)
    }

    async fn delete(&self, path: &ObjectPath) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.local_path(path)).await {
            Ok(()) => {
                tracing::debug!("Removed {}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_writes_file_and_returns_public_url() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(tmp.path(), "http://localhost:3000/uploads").unwrap();
        let path = ObjectPath::new("u1/i1/1-0.jpg").unwrap();

        let url = store.put(&path, Bytes::from_static(b"jpeg")).await.unwrap();

        assert_eq!(url, "http://localhost:3000/uploads/u1/i1/1-0.jpg");
        let stored = std::fs::read(tmp.path().join("u1/i1/1-0.jpg")).unwrap();
        assert_eq!(stored, b"jpeg");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(tmp.path(), "http://cdn.example/").unwrap();
        let path = ObjectPath::new("u1/i1/1-0.png").unwrap();

        store.put(&path, Bytes::from_static(b"png")).await.unwrap();
        store.delete(&path).await.unwrap();
        assert!(!store.local_path(&path).exists());

        store.delete(&path).await.unwrap();
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            LocalObjectStore::new("/tmp", "not a url"),
            Err(StorageError::Url(_))
        ));
    }
}
