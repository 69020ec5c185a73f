//! The OCI storage engine: content-addressed blobs, resumable uploads, and
//! manifest/tag indirection on top of a [`BlobStore`].

pub mod digest;
pub mod path;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{RegistryError, Result};
use crate::oci::digest::{Digest, VerifyingReader};
use crate::oci::path::{
    blob_data_path, manifest_revision_link_path, manifest_tag_current_link_path,
    manifest_tags_dir, upload_data_path,
};
use crate::oci::session::{SessionManager, UploadSession};
use crate::storage::{BlobStore, ByteStream};

pub const DEFAULT_MANIFEST_CONTENT_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Metadata for a stored blob.
#[derive(Debug, Clone)]
pub struct BlobInfo {
    pub digest: Digest,
    pub size: u64,
}

/// Metadata for a stored manifest.
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub digest: Digest,
    pub content_type: String,
    pub size: u64,
}

/// OCI-specific operations layered over a generic blob store.
pub struct OciStorage {
    store: Arc<dyn BlobStore>,
    sessions: SessionManager,
}

impl OciStorage {
    pub fn new(store: Arc<dyn BlobStore>, upload_session_timeout: Duration) -> Self {
        Self {
            store,
            sessions: SessionManager::new(upload_session_timeout),
        }
    }

    /// Check whether a blob with the given digest is stored.
    pub async fn blob_exists(&self, digest: &Digest) -> Result<bool> {
        self.store.exists(&blob_data_path(digest)).await
    }

    /// Open a blob for streaming reads.
    pub async fn get_blob(&self, digest: &Digest) -> Result<ByteStream> {
        match self.store.download(&blob_data_path(digest)).await {
            Ok(reader) => Ok(reader),
            Err(RegistryError::FileNotFound(_)) => Err(RegistryError::BlobNotFound),
            Err(err) => Err(err.context("failed to get blob")),
        }
    }

    /// Size information for a blob. The blob store contract only offers
    /// `download`, so the stream is consumed and discarded to count bytes.
    pub async fn get_blob_info(&self, digest: &Digest) -> Result<BlobInfo> {
        if !self.blob_exists(digest).await? {
            return Err(RegistryError::BlobNotFound);
        }

        let mut reader = self
            .store
            .download(&blob_data_path(digest))
            .await
            .map_err(|err| err.context("failed to get blob info"))?;
        let size = tokio::io::copy(&mut reader, &mut tokio::io::sink())
            .await
            .map_err(|err| RegistryError::Storage(format!("failed to read blob size: {err}")))?;

        Ok(BlobInfo {
            digest: digest.clone(),
            size,
        })
    }

    /// Start a new upload session and create its empty scratch object.
    pub async fn initiate_upload(&self, repository: &str) -> Result<String> {
        let uuid = self.sessions.create(repository).await;

        let mut empty = tokio::io::empty();
        if let Err(err) = self.store.upload(&upload_data_path(&uuid), &mut empty).await {
            self.sessions.delete(&uuid).await;
            return Err(err.context("failed to initialize upload"));
        }

        Ok(uuid)
    }

    /// Append a chunk to an in-progress upload and return the new total size.
    pub async fn write_upload_chunk(
        &self,
        uuid: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64> {
        self.sessions.get(uuid).await?;

        let total_size = self
            .store
            .append(&upload_data_path(uuid), reader)
            .await
            .map_err(|err| err.context("failed to write upload chunk"))?;
        self.sessions.update_bytes(uuid, total_size).await?;

        Ok(total_size)
    }

    /// Verify the scratch object against `expected` and commit it to the
    /// content-addressed blob path. On a digest mismatch the scratch and the
    /// session are left intact so the client can keep patching and retry.
    pub async fn complete_upload(&self, uuid: &str, expected: &Digest) -> Result<Digest> {
        self.sessions.get(uuid).await?;

        let scratch_path = upload_data_path(uuid);
        let reader = match self.store.download(&scratch_path).await {
            Ok(reader) => reader,
            Err(RegistryError::FileNotFound(_)) => return Err(RegistryError::UploadNotFound),
            Err(err) => return Err(err.context("failed to read upload")),
        };

        let mut verifier = VerifyingReader::new(reader);
        let mut data = Vec::new();
        verifier
            .read_to_end(&mut data)
            .await
            .map_err(|err| RegistryError::Storage(format!("failed to read upload data: {err}")))?;
        verifier.verify(expected)?;

        let mut bytes: &[u8] = &data;
        self.store
            .upload(&blob_data_path(expected), &mut bytes)
            .await
            .map_err(|err| err.context("failed to store blob"))?;

        let _ = self.store.delete(&scratch_path).await;
        self.sessions.delete(uuid).await;

        Ok(expected.clone())
    }

    /// Abort an upload, removing both the scratch object and the session.
    pub async fn cancel_upload(&self, uuid: &str) -> Result<()> {
        self.sessions.get(uuid).await?;

        let _ = self.store.delete(&upload_data_path(uuid)).await;
        self.sessions.delete(uuid).await;
        Ok(())
    }

    /// Progress snapshot for an in-flight upload.
    pub async fn upload_status(&self, uuid: &str) -> Result<UploadSession> {
        self.sessions.get(uuid).await
    }

    /// Remove every expired upload session and best-effort delete its scratch
    /// object. Returns the number of sessions reclaimed.
    pub async fn sweep_expired_uploads(&self) -> usize {
        let expired = self.sessions.sweep_expired().await;
        for session in &expired {
            if let Err(err) = self.store.delete(&upload_data_path(&session.uuid)).await {
                tracing::warn!(
                    uuid = %session.uuid,
                    error = %err,
                    "failed to remove expired upload scratch"
                );
            }
        }
        expired.len()
    }

    /// Store a manifest: the bytes land at their content-addressed blob path,
    /// a revision link records the content type, and when `reference` is a
    /// tag (no `:`) the tag's current link is overwritten to point at it.
    pub async fn put_manifest(
        &self,
        name: &str,
        reference: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Digest> {
        let digest = Digest::sha256_of(data);

        self.verify_referenced_blobs(data).await?;

        let mut bytes = data;
        self.store
            .upload(&blob_data_path(&digest), &mut bytes)
            .await
            .map_err(|err| err.context("failed to store manifest"))?;

        let link_payload = format!("{digest}\n{content_type}");
        let mut payload = link_payload.as_bytes();
        self.store
            .upload(&manifest_revision_link_path(name, &digest), &mut payload)
            .await
            .map_err(|err| err.context("failed to store manifest revision link"))?;

        if !is_digest_reference(reference) {
            let mut payload = link_payload.as_bytes();
            self.store
                .upload(&manifest_tag_current_link_path(name, reference), &mut payload)
                .await
                .map_err(|err| err.context("failed to store tag link"))?;
        }

        Ok(digest)
    }

    /// Fetch a manifest by tag or digest reference.
    pub async fn get_manifest(
        &self,
        name: &str,
        reference: &str,
    ) -> Result<(Vec<u8>, Digest, String)> {
        let (digest, mut content_type) = if is_digest_reference(reference) {
            let digest = Digest::parse(reference)?;
            let content_type = self.read_revision_link(name, &digest).await?;
            (digest, content_type)
        } else {
            self.read_tag_link(name, reference).await?
        };

        let mut reader = match self.store.download(&blob_data_path(&digest)).await {
            Ok(reader) => reader,
            Err(RegistryError::FileNotFound(_)) => return Err(RegistryError::ManifestNotFound),
            Err(err) => return Err(err.context("failed to read manifest")),
        };
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.map_err(|err| {
            RegistryError::Storage(format!("failed to read manifest data: {err}"))
        })?;

        if content_type.is_empty() {
            content_type = DEFAULT_MANIFEST_CONTENT_TYPE.to_string();
        }

        Ok((data, digest, content_type))
    }

    /// Existence check for a manifest, reporting digest, content type, and size.
    pub async fn manifest_exists(&self, name: &str, reference: &str) -> Result<ManifestInfo> {
        let (data, digest, content_type) = self.get_manifest(name, reference).await?;
        Ok(ManifestInfo {
            digest,
            content_type,
            size: data.len() as u64,
        })
    }

    /// All tags of a repository; an unknown repository has no tags.
    pub async fn list_tags(&self, name: &str) -> Result<Vec<String>> {
        match self.store.list(&manifest_tags_dir(name)).await {
            Ok(entries) => Ok(entries),
            Err(RegistryError::FileNotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err.context("failed to list tags")),
        }
    }

    /// When the manifest parses as an image manifest, every config and layer
    /// digest it references must already be stored. Payloads that are not a
    /// JSON object with descriptors skip the check; the distribution spec
    /// allows opaque manifest media types.
    async fn verify_referenced_blobs(&self, data: &[u8]) -> Result<()> {
        for reference in referenced_blob_digests(data) {
            let Ok(digest) = Digest::parse(&reference) else {
                continue;
            };
            if !self.blob_exists(&digest).await? {
                return Err(RegistryError::ManifestBlobUnknown(reference));
            }
        }
        Ok(())
    }

    async fn read_revision_link(&self, name: &str, digest: &Digest) -> Result<String> {
        let link = self
            .read_link_file(&manifest_revision_link_path(name, digest))
            .await?;
        let (_, content_type) = parse_link_payload(&link)?;
        Ok(content_type)
    }

    async fn read_tag_link(&self, name: &str, tag: &str) -> Result<(Digest, String)> {
        let link = self
            .read_link_file(&manifest_tag_current_link_path(name, tag))
            .await?;
        let (digest_line, content_type) = parse_link_payload(&link)?;
        let digest = Digest::parse(&digest_line)
            .map_err(|_| RegistryError::Storage(format!("invalid digest in tag link: {link:?}")))?;
        Ok((digest, content_type))
    }

    async fn read_link_file(&self, path: &str) -> Result<String> {
        let mut reader = match self.store.download(path).await {
            Ok(reader) => reader,
            Err(RegistryError::FileNotFound(_)) => return Err(RegistryError::ManifestNotFound),
            Err(err) => return Err(err.context("failed to read link")),
        };
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|err| RegistryError::Storage(format!("failed to read link data: {err}")))?;
        String::from_utf8(data)
            .map_err(|_| RegistryError::Storage("link file is not valid UTF-8".to_string()))
    }
}

/// A reference is a digest when it contains `:`, a tag otherwise.
pub fn is_digest_reference(reference: &str) -> bool {
    reference.contains(':')
}

/// Split a link payload into its digest line and optional content-type line.
fn parse_link_payload(link: &str) -> Result<(String, String)> {
    match link.split_once('\n') {
        Some((digest, content_type)) => {
            Ok((digest.trim().to_string(), content_type.trim().to_string()))
        }
        None => Ok((link.trim().to_string(), String::new())),
    }
}

/// Config and layer digests referenced by an image manifest, or nothing when
/// the payload is not shaped like one.
fn referenced_blob_digests(data: &[u8]) -> Vec<String> {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return Vec::new();
    };
    let Some(object) = value.as_object() else {
        return Vec::new();
    };

    let mut digests = Vec::new();
    if let Some(digest) = object
        .get("config")
        .and_then(|config| config.get("digest"))
        .and_then(|digest| digest.as_str())
    {
        digests.push(digest.to_string());
    }
    if let Some(layers) = object.get("layers").and_then(|layers| layers.as_array()) {
        for layer in layers {
            if let Some(digest) = layer.get("digest").and_then(|digest| digest.as_str()) {
                digests.push(digest.to_string());
            }
        }
    }
    digests
}
