use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::error::{RegistryError, Result};
use crate::storage::{BlobStore, ByteStream};

/// Filesystem-backed [`BlobStore`] rooted at a base directory.
///
/// Logical paths are slash-separated and resolved beneath the base; parent
/// directories are created on demand for writes.
pub struct LocalStore {
    base_dir: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `base_dir`.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|err| {
                RegistryError::Storage(format!(
                    "failed to create storage root {}: {err}",
                    base_dir.display()
                ))
            })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    async fn create_parent_dirs(&self, full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                RegistryError::Storage(format!(
                    "failed to create directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn upload(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let full_path = self.resolve(path);
        self.create_parent_dirs(&full_path).await?;

        let mut file = File::create(&full_path).await?;
        tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn append(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        let full_path = self.resolve(path);
        self.create_parent_dirs(&full_path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full_path)
            .await?;
        tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        Ok(file.metadata().await?.len())
    }

    async fn download(&self, path: &str) -> Result<ByteStream> {
        match File::open(self.resolve(path)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RegistryError::FileNotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.resolve(dir)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn store() -> (LocalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = LocalStore::new(dir.path()).await.unwrap();
        (store, dir)
    }

    async fn read_all(store: &LocalStore, path: &str) -> Vec<u8> {
        let mut reader = store.download(path).await.unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    #[tokio::test]
    async fn upload_creates_nested_dirs_and_overwrites() {
        let (store, _dir) = store().await;

        store
            .upload("v2/blobs/sha256/ab/abcd/data", &mut &b"first"[..])
            .await
            .unwrap();
        assert_eq!(read_all(&store, "v2/blobs/sha256/ab/abcd/data").await, b"first");

        store
            .upload("v2/blobs/sha256/ab/abcd/data", &mut &b"second"[..])
            .await
            .unwrap();
        assert_eq!(
            read_all(&store, "v2/blobs/sha256/ab/abcd/data").await,
            b"second"
        );
    }

    #[tokio::test]
    async fn append_accumulates_and_reports_total_size() {
        let (store, _dir) = store().await;

        let size = store.append("v2/uploads/u1/data", &mut &b"hello "[..]).await.unwrap();
        assert_eq!(size, 6);
        let size = store.append("v2/uploads/u1/data", &mut &b"world"[..]).await.unwrap();
        assert_eq!(size, 11);

        assert_eq!(read_all(&store, "v2/uploads/u1/data").await, b"hello world");
    }

    #[tokio::test]
    async fn download_missing_is_file_not_found() {
        let (store, _dir) = store().await;
        assert!(matches!(
            store.download("no/such/object").await,
            Err(RegistryError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn exists_and_idempotent_delete() {
        let (store, _dir) = store().await;

        store.upload("a/b", &mut &b"x"[..]).await.unwrap();
        assert!(store.exists("a/b").await.unwrap());

        store.delete("a/b").await.unwrap();
        assert!(!store.exists("a/b").await.unwrap());
        store.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn list_returns_children_or_empty() {
        let (store, _dir) = store().await;

        store
            .upload("repo/_manifests/tags/v1.0/current/link", &mut &b"x"[..])
            .await
            .unwrap();
        store
            .upload("repo/_manifests/tags/v2.0/current/link", &mut &b"x"[..])
            .await
            .unwrap();

        let mut tags = store.list("repo/_manifests/tags").await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["v1.0", "v2.0"]);

        assert!(store.list("missing/dir").await.unwrap().is_empty());
    }
}
