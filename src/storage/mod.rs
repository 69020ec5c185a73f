pub mod local;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

pub use local::LocalStore;

/// Boxed streaming reader handed out by [`BlobStore::download`].
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opaque byte-stream store keyed by logical, slash-separated paths.
///
/// The OCI engine computes every path it uses; implementations are free to
/// map them onto a filesystem, an object store, or anything else, as long as
/// overwrites of small objects are atomic enough that readers never observe a
/// torn link file.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the reader's bytes at `path`, replacing any prior content.
    async fn upload(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin))
        -> Result<()>;

    /// Append the reader's bytes to the object at `path`, creating it when
    /// missing. Returns the object's total size after the write.
    async fn append(&self, path: &str, reader: &mut (dyn AsyncRead + Send + Unpin))
        -> Result<u64>;

    /// Open the object at `path` for streaming reads.
    /// Fails with `RegistryError::FileNotFound` when absent.
    async fn download(&self, path: &str) -> Result<ByteStream>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Remove the object at `path`. Removing an absent object is a no-op.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the immediate children of `dir`. A missing directory yields
    /// an empty list.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}
