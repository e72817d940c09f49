//! Pre-flight checks run before anything is stopped.
//!
//! Every violation is collected so the operator sees all of them at once.

use migrator_api_models::{Network, ServerInfo, StoragePool};
use migrator_client::DaemonClient;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Storage drivers both implementations understand.
pub const SUPPORTED_DRIVERS: &[&str] = &[
    "dir",
    "zfs",
    "btrfs",
    "lvm",
    "ceph",
    "cephfs",
    "cephobject",
];

/// Oldest supported source release.
pub const MIN_SOURCE_VERSION: (u32, u32) = (4, 0);
/// Newest supported source release.
pub const MAX_SOURCE_VERSION: (u32, u32) = (5, 21);

/// Everything the checks look at.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    /// Source `GET /1.0`.
    pub source: ServerInfo,
    /// Target `GET /1.0`.
    pub target: ServerInfo,
    /// Source storage pools.
    pub source_pools: Vec<StoragePool>,
    /// Target storage pools.
    pub target_pools: Vec<StoragePool>,
    /// Target instances.
    pub target_instances: Vec<String>,
    /// Target networks.
    pub target_networks: Vec<Network>,
}

impl Inventory {
    /// Fetch the inventory from both daemons.
    ///
    /// # Errors
    ///
    /// Returns an error when any request fails.
    pub async fn collect(source: &dyn DaemonClient, target: &dyn DaemonClient) -> AppResult<Self> {
        let fetch = |err| AppError::client("validate", err);
        Ok(Self {
            source: source.server_info(None).await.map_err(fetch)?,
            target: target.server_info(None).await.map_err(fetch)?,
            source_pools: source.storage_pools(None).await.map_err(fetch)?,
            target_pools: target.storage_pools(None).await.map_err(fetch)?,
            target_instances: target.instance_names().await.map_err(fetch)?,
            target_networks: target.networks().await.map_err(fetch)?,
        })
    }
}

/// Parse `major.minor[.patch]`.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = version.trim().split('.').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut numbers = parts.iter().map(|part| part.parse::<u32>().ok());
    let major = numbers.next()??;
    let minor = numbers.next()??;
    if numbers.any(|patch| patch.is_none()) {
        return None;
    }
    Some((major, minor))
}

/// All rule violations in `inventory`; empty when the migration may proceed.
#[must_use]
pub fn violations(inventory: &Inventory) -> Vec<String> {
    let mut found = Vec::new();

    let source_kind = inventory.source.environment.server.as_str();
    if source_kind != "lxd" {
        found.push(format!("source server is {source_kind:?}, expected \"lxd\""));
    }
    let target_kind = inventory.target.environment.server.as_str();
    if target_kind != "incus" {
        found.push(format!("target server is {target_kind:?}, expected \"incus\""));
    }

    let version = inventory.source.environment.server_version.as_str();
    match parse_version(version) {
        Some(parsed) if (MIN_SOURCE_VERSION..=MAX_SOURCE_VERSION).contains(&parsed) => {}
        Some(_) => found.push(format!(
            "source version {version} is not supported (supported: {}.{} to {}.{})",
            MIN_SOURCE_VERSION.0, MIN_SOURCE_VERSION.1, MAX_SOURCE_VERSION.0, MAX_SOURCE_VERSION.1
        )),
        None => found.push(format!("source version {version:?} could not be parsed")),
    }

    if !inventory.target_pools.is_empty() {
        found.push(format!(
            "target server has {} storage pool(s) defined",
            inventory.target_pools.len()
        ));
    }
    if !inventory.target_instances.is_empty() {
        found.push(format!(
            "target server has {} instance(s)",
            inventory.target_instances.len()
        ));
    }
    let managed = inventory
        .target_networks
        .iter()
        .filter(|network| network.managed)
        .count();
    if managed > 0 {
        found.push(format!("target server has {managed} managed network(s)"));
    }

    for pool in &inventory.source_pools {
        if !SUPPORTED_DRIVERS.contains(&pool.driver.as_str()) {
            found.push(format!(
                "storage pool {:?} uses unsupported driver {:?}",
                pool.name, pool.driver
            ));
        }
    }
    found
}

/// Collect the inventory and fail with every violation found.
///
/// # Errors
///
/// Returns [`AppError::Validation`] when any rule is violated, or a client
/// error when the inventory cannot be fetched.
pub async fn preflight(source: &dyn DaemonClient, target: &dyn DaemonClient) -> AppResult<()> {
    let inventory = Inventory::collect(source, target).await?;
    let violations = violations(&inventory);
    if violations.is_empty() {
        info!(
            version = %inventory.source.environment.server_version,
            pools = inventory.source_pools.len(),
            "pre-flight validation passed"
        );
        return Ok(());
    }
    for violation in &violations {
        warn!(%violation, "pre-flight validation violation");
    }
    Err(AppError::Validation { violations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use migrator_test_support::fixtures::{incus_server, lxd_server, pool};

    fn clean() -> Inventory {
        Inventory {
            source: lxd_server("5.21.1", false),
            target: incus_server("node1"),
            source_pools: vec![pool("default", "zfs", &[])],
            ..Inventory::default()
        }
    }

    #[test]
    fn versions_parse_with_optional_patch() {
        assert_eq!(parse_version("5.21"), Some((5, 21)));
        assert_eq!(parse_version("5.0.3"), Some((5, 0)));
        assert_eq!(parse_version("5"), None);
        assert_eq!(parse_version("5.x"), None);
        assert_eq!(parse_version("5.21.1.4"), None);
        assert_eq!(parse_version("5.21.rc1"), None);
    }

    #[test]
    fn clean_inventory_passes() {
        assert!(violations(&clean()).is_empty());
        let mut oldest = clean();
        oldest.source.environment.server_version = "4.0.9".into();
        assert!(violations(&oldest).is_empty());
    }

    #[test]
    fn out_of_range_versions_fail() {
        for version in ["3.23", "5.22", "6.0.0"] {
            let mut inventory = clean();
            inventory.source.environment.server_version = version.into();
            assert_eq!(violations(&inventory).len(), 1, "{version}");
        }
    }

    #[test]
    fn every_violation_is_collected() {
        let mut inventory = clean();
        inventory.source.environment.server = "incus".into();
        inventory.target.environment.server = "lxd".into();
        inventory.target_pools.push(pool("default", "dir", &[]));
        inventory.target_instances.push("c1".into());
        inventory.target_networks.push(Network {
            name: "incusbr0".into(),
            managed: true,
            kind: "bridge".into(),
        });
        inventory.target_networks.push(Network {
            name: "eth0".into(),
            managed: false,
            kind: "physical".into(),
        });
        inventory.source_pools.push(pool("nfs", "nfs", &[]));

        let found = violations(&inventory);
        assert_eq!(found.len(), 6, "{found:?}");
        assert!(found.iter().any(|violation| violation.contains("\"nfs\"")));
        assert!(
            found
                .iter()
                .any(|violation| violation.contains("1 managed network"))
        );
    }
}
