use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};

/// In-memory record of one in-progress blob upload.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub uuid: String,
    pub repository: String,
    pub started_at: Instant,
    pub bytes_written: u64,
}

/// Tracks active upload sessions keyed by UUID.
///
/// Sessions live only in process memory; a restart invalidates every
/// in-flight upload and clients are expected to retry. Expiry is measured
/// from `started_at` and is never reset by activity, so a stalled client
/// cannot hold a session open indefinitely.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, UploadSession>>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Start a session for `repository` and return its UUID.
    pub async fn create(&self, repository: &str) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let session = UploadSession {
            uuid: uuid.clone(),
            repository: repository.to_string(),
            started_at: Instant::now(),
            bytes_written: 0,
        };
        self.sessions.write().await.insert(uuid.clone(), session);
        uuid
    }

    /// Fetch a snapshot of a session. A session past its TTL is removed and
    /// reported as `UploadNotFound`, same as one that never existed.
    pub async fn get(&self, uuid: &str) -> Result<UploadSession> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(uuid).cloned()
        };

        let session = session.ok_or(RegistryError::UploadNotFound)?;
        if session.started_at.elapsed() > self.timeout {
            self.delete(uuid).await;
            return Err(RegistryError::UploadNotFound);
        }
        Ok(session)
    }

    /// Record the current total size of the upload scratch object.
    pub async fn update_bytes(&self, uuid: &str, bytes_written: u64) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(uuid).ok_or(RegistryError::UploadNotFound)?;
        session.bytes_written = bytes_written;
        Ok(())
    }

    /// Remove a session. Removing an absent session is a no-op.
    pub async fn delete(&self, uuid: &str) {
        self.sessions.write().await.remove(uuid);
    }

    /// Remove and return every session past its TTL, so the caller can
    /// reclaim the matching scratch objects.
    pub async fn sweep_expired(&self) -> Vec<UploadSession> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.started_at.elapsed() > self.timeout)
            .map(|(uuid, _)| uuid.clone())
            .collect();
        expired
            .iter()
            .filter_map(|uuid| sessions.remove(uuid))
            .collect()
    }
}
