//! Portside deployment core
//!
//! Blue-green, two-port deployment orchestration for systemd-managed
//! application instances on remote hosts, with health-gated reverse-proxy
//! cutover. The CLI and API layers sit on top of this crate.

pub mod deploy;
pub mod errors;
pub mod ledger;
pub mod logs;
pub mod models;
pub mod proxy;
pub mod ssh;
pub mod storage;
