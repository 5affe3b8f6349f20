//! Release descriptor handed in by the CLI/API layer

use serde::{Deserialize, Serialize};

/// What the operator asked to deploy.
///
/// The orchestrator resolves this against the artifact registry before
/// touching the host; if neither hash nor commit matches a registered
/// artifact, the attempt fails fast with "no build".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Release version label
    pub version: String,

    /// Git commit the release was built from
    #[serde(default)]
    pub git_commit_sha: Option<String>,

    /// MD5 of the built release content (full hash or prefix)
    #[serde(default)]
    pub md5_hash: Option<String>,
}
