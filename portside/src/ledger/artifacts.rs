//! Content-addressed build artifact registry

use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::debug;

use crate::errors::PortsideError;
use crate::ledger::store::LedgerStore;
use crate::models::artifact::BuildArtifact;
use crate::models::release::Release;

/// Registry of build outputs keyed by content hash.
///
/// Lookup runs before any build or upload decision, so identical content
/// is never rebuilt or re-uploaded.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<LedgerStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    /// Look up an artifact by full MD5, git commit SHA, or MD5 prefix,
    /// in that order. Absence is not an error.
    pub async fn check(&self, query: &str) -> Option<BuildArtifact> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }

        self.store
            .read(move |state| {
                state
                    .artifacts
                    .iter()
                    .find(|a| a.md5_hash == query)
                    .or_else(|| {
                        state
                            .artifacts
                            .iter()
                            .find(|a| a.git_commit_sha.as_deref() == Some(query.as_str()))
                    })
                    .or_else(|| {
                        state
                            .artifacts
                            .iter()
                            .find(|a| a.md5_hash.starts_with(&query))
                    })
                    .cloned()
            })
            .await
    }

    /// Resolve a release request to a registered artifact, or fail fast
    /// with "no build".
    pub async fn resolve(&self, release: &Release) -> Result<BuildArtifact, PortsideError> {
        if let Some(hash) = &release.md5_hash {
            if let Some(artifact) = self.check(hash).await {
                debug!("Artifact {} reused for hash {}", artifact.id, hash);
                return Ok(artifact);
            }
        }
        if let Some(sha) = &release.git_commit_sha {
            if let Some(artifact) = self.check(sha).await {
                debug!("Artifact {} reused for commit {}", artifact.id, sha);
                return Ok(artifact);
            }
        }
        Err(PortsideError::ArtifactNotFound(format!(
            "no build registered for version {}",
            release.version
        )))
    }

    /// Hash uploaded content and register it in one step. The caller
    /// never computes the digest itself, so the registry key always
    /// reflects the bytes that were actually uploaded.
    pub async fn register_upload(
        &self,
        version: impl Into<String>,
        git_commit_sha: Option<String>,
        content: &[u8],
        local_path: impl Into<String>,
    ) -> Result<BuildArtifact, PortsideError> {
        let artifact = BuildArtifact::new(version, git_commit_sha, md5_hex(content), local_path);
        self.register(artifact).await
    }

    /// Register an artifact after a successful build + upload.
    ///
    /// Idempotent on content: registering a hash that already exists
    /// returns the existing row.
    pub async fn register(
        &self,
        artifact: BuildArtifact,
    ) -> Result<BuildArtifact, PortsideError> {
        self.store
            .mutate(move |state| {
                if let Some(existing) = state
                    .artifacts
                    .iter()
                    .find(|a| a.md5_hash == artifact.md5_hash)
                {
                    return Ok(existing.clone());
                }
                state.artifacts.push(artifact.clone());
                Ok(artifact)
            })
            .await
    }
}

/// MD5 of a byte slice as lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
