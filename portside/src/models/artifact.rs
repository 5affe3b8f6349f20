//! Build artifact model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content-addressed build output.
///
/// Looked up by hash or commit before deciding whether to rebuild, so
/// identical content is never rebuilt or re-uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Unique artifact ID
    pub id: Uuid,

    /// Release version the artifact was built for
    pub version: String,

    /// Git commit the artifact was built from
    pub git_commit_sha: Option<String>,

    /// MD5 of the artifact content; unique across the registry
    pub md5_hash: String,

    /// Path of the uploaded release on the build host
    pub local_path: String,

    /// When the artifact was registered
    pub created_at: DateTime<Utc>,
}

impl BuildArtifact {
    pub fn new(
        version: impl Into<String>,
        git_commit_sha: Option<String>,
        md5_hash: impl Into<String>,
        local_path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            version: version.into(),
            git_commit_sha,
            md5_hash: md5_hash.into(),
            local_path: local_path.into(),
            created_at: Utc::now(),
        }
    }
}
