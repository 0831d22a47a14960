use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use easel_core::{ArtifactReference, ArtifactStore, ArtifactStoreError};
use sha2::{Digest, Sha256};

/// Content-addressed filesystem artifact store
///
/// Bytes live at `<root>/<aa>/<sha256>` where `aa` is the first hex byte.
/// Writes go through a temp file and rename, so a reference never points at
/// partially written content.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Shard by the first hex byte; anything too short to shard is not a
    /// digest this store produced
    fn path_for(&self, sha256: &str) -> Option<PathBuf> {
        if sha256.len() < 2 || !sha256.is_char_boundary(2) {
            return None;
        }
        Some(self.root.join(&sha256[..2]).join(sha256))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, bytes: &[u8]) -> Result<ArtifactReference, ArtifactStoreError> {
        let sha256 = hex_digest(bytes);
        let path = self
            .path_for(&sha256)
            .ok_or_else(|| ArtifactStoreError::Storage("digest too short to shard".to_owned()))?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            // Same content already stored; content addressing makes this a
            // no-op rather than a conflict
            return Ok(ArtifactReference(sha256));
        }

        let parent = path.parent().expect("artifact path always has a parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ArtifactStoreError::Storage(format!("create {}: {e}", parent.display())))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| ArtifactStoreError::Storage(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ArtifactStoreError::Storage(format!("rename {}: {e}", path.display())))?;

        tracing::debug!(sha256, "artifact stored");
        Ok(ArtifactReference(sha256))
    }

    async fn read(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactStoreError> {
        let Some(path) = self.path_for(&reference.0) else {
            return Err(ArtifactStoreError::NotFound(reference.clone()));
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactStoreError::NotFound(reference.clone()))
            }
            Err(e) => Err(ArtifactStoreError::Storage(format!("read {}: {e}", path.display()))),
        }
    }
}

/// In-memory artifact store for tests and embedded use
#[derive(Clone, Default)]
pub struct MemoryArtifactStore {
    blobs: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn write(&self, bytes: &[u8]) -> Result<ArtifactReference, ArtifactStoreError> {
        let sha256 = hex_digest(bytes);
        self.blobs.insert(sha256.clone(), bytes.to_vec());
        Ok(ArtifactReference(sha256))
    }

    async fn read(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactStoreError> {
        self.blobs
            .get(&reference.0)
            .map(|blob| blob.clone())
            .ok_or_else(|| ArtifactStoreError::NotFound(reference.clone()))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
