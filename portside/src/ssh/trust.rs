//! Host-key trust policies

use std::sync::Arc;

use tracing::{info, warn};

/// Decision callback for trust-on-first-use. Receives the presented
/// SHA256 fingerprint; returning true accepts (and is expected to
/// persist) it.
pub type TrustCallback = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How to treat the host key presented during connection.
#[derive(Clone)]
pub enum HostKeyPolicy {
    /// Accept only a key matching this SHA256 fingerprint
    Pinned(String),

    /// Defer to a callback, typically an interactive confirm-and-persist
    TrustOnFirstUse(TrustCallback),

    /// Reject every key; useful as a safe default for unattended runs
    AlwaysReject,
}

impl std::fmt::Debug for HostKeyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostKeyPolicy::Pinned(fp) => f.debug_tuple("Pinned").field(fp).finish(),
            HostKeyPolicy::TrustOnFirstUse(_) => f.write_str("TrustOnFirstUse(..)"),
            HostKeyPolicy::AlwaysReject => f.write_str("AlwaysReject"),
        }
    }
}

impl HostKeyPolicy {
    /// Verify a presented fingerprint against the policy.
    pub fn verify(&self, fingerprint: &str) -> bool {
        match self {
            HostKeyPolicy::Pinned(expected) => {
                let matches = normalize(expected) == normalize(fingerprint);
                if !matches {
                    warn!(
                        "Host key mismatch: expected {}, presented {}",
                        expected, fingerprint
                    );
                }
                matches
            }
            HostKeyPolicy::TrustOnFirstUse(callback) => {
                let accepted = callback(fingerprint);
                if accepted {
                    info!("Host key {} accepted by trust callback", fingerprint);
                } else {
                    warn!("Host key {} rejected by trust callback", fingerprint);
                }
                accepted
            }
            HostKeyPolicy::AlwaysReject => {
                warn!("Host key {} rejected by policy", fingerprint);
                false
            }
        }
    }
}

fn normalize(fingerprint: &str) -> &str {
    fingerprint.trim().trim_start_matches("SHA256:")
}
