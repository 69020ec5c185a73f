/// Result alias used across the storage engine.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors produced by the blob store and the OCI storage engine.
///
/// The not-found and validation variants are part of the engine contract and
/// are mapped to specific OCI error codes by the HTTP layer; everything else
/// surfaces as an internal error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A blob store object is missing at the requested path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The requested blob does not exist.
    #[error("blob not found")]
    BlobNotFound,

    /// The requested manifest does not exist.
    #[error("manifest not found")]
    ManifestNotFound,

    /// The upload session does not exist or has expired.
    #[error("upload not found")]
    UploadNotFound,

    /// A digest string did not match `algorithm:hex`.
    #[error("invalid digest: {0:?}")]
    InvalidDigest(String),

    /// Computed content digest differs from the one the client declared.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// A manifest references a config or layer blob the registry does not hold.
    #[error("manifest references unknown blob {0}")]
    ManifestBlobUnknown(String),

    /// Underlying blob store failure with context attached.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Wrap an arbitrary failure with operation context, preserving the
    /// contract variants untouched so the HTTP layer can still match on them.
    pub fn context(self, what: &str) -> Self {
        match self {
            RegistryError::FileNotFound(_)
            | RegistryError::BlobNotFound
            | RegistryError::ManifestNotFound
            | RegistryError::UploadNotFound
            | RegistryError::InvalidDigest(_)
            | RegistryError::DigestMismatch { .. }
            | RegistryError::ManifestBlobUnknown(_) => self,
            other => RegistryError::Storage(format!("{what}: {other}")),
        }
    }
}
