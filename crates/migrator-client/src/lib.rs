#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! REST client for the LXD and Incus daemons.
//!
//! Layout: `error.rs` (client errors), `unix.rs` (HTTP/1.1 over the daemon's
//! unix socket). The [`DaemonClient`] trait is the seam the migration code is
//! written against; both source and target daemons speak the same surface.

pub mod error;
pub mod unix;

use async_trait::async_trait;
use migrator_api_models::{
    ClusterMember, ClusterMemberStatePost, Network, Operation, ServerInfo, StoragePool,
};

pub use error::{ClientError, ClientResult};
pub use unix::UnixDaemonClient;

/// Handle to a background operation created by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    /// Operation URL, e.g. `/1.0/operations/<uuid>`.
    pub url: String,
}

impl OperationHandle {
    /// Wrap an operation URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Black-box operations consumed from a daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Fetch server information, optionally from a specific cluster member.
    async fn server_info(&self, member: Option<&str>) -> ClientResult<ServerInfo>;
    /// List storage pools, optionally scoped to a cluster member.
    async fn storage_pools(&self, member: Option<&str>) -> ClientResult<Vec<StoragePool>>;
    /// List cluster members.
    async fn cluster_members(&self) -> ClientResult<Vec<ClusterMember>>;
    /// List instance names across all projects.
    async fn instance_names(&self) -> ClientResult<Vec<String>>;
    /// List networks.
    async fn networks(&self) -> ClientResult<Vec<Network>>;
    /// Request a cluster member state transition.
    async fn update_member_state(
        &self,
        member: &str,
        request: &ClusterMemberStatePost,
    ) -> ClientResult<OperationHandle>;
    /// Block until a background operation completes.
    ///
    /// Fails with [`ClientError::OperationFailed`] when the operation did not succeed.
    async fn wait_operation(&self, handle: &OperationHandle) -> ClientResult<Operation>;
}
