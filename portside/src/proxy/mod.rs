//! Reverse-proxy route synchronization

pub mod caddy;

use async_trait::async_trait;

use crate::errors::PortsideError;

/// The four route mutations the orchestrator needs, all idempotent.
///
/// Route mutation is the last step of a successful deployment; it never
/// runs before the new release is confirmed healthy. Keeping the seam
/// this narrow lets the orchestrator be tested against an in-memory
/// route table.
#[async_trait]
pub trait RouteTable: Send + Sync {
    /// Create the proxy's server entry if it does not already exist.
    /// Never clobbers a running config.
    async fn ensure_base_structure(&self) -> Result<(), PortsideError>;

    /// Add or replace the mapping of a hostname to `localhost:<port>`.
    async fn set_route(&self, domain: &str, port: u16) -> Result<(), PortsideError>;

    /// Add or replace mappings for several hostnames in one pass.
    async fn set_routes(&self, domains: &[String], port: u16) -> Result<(), PortsideError> {
        for domain in domains {
            self.set_route(domain, port).await?;
        }
        Ok(())
    }

    /// Remove the mapping for a hostname. Removing an absent mapping is
    /// a no-op.
    async fn delete_route(&self, domain: &str) -> Result<(), PortsideError>;
}
