//! Test fixtures and environment helpers.

use std::collections::BTreeMap;

use anyhow::Result;
use migrator_api_models::{
    ClusterMember, MemberStatus, OVN_NORTHBOUND_KEY, ServerEnvironment, ServerInfo, StoragePool,
};
use serde_json::Value;
use tempfile::TempDir;

/// Create a scratch directory for a test.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn temp_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix("migrator-").tempdir()?)
}

/// Server info as reported by an LXD daemon.
#[must_use]
pub fn lxd_server(version: &str, clustered: bool) -> ServerInfo {
    ServerInfo {
        config: BTreeMap::new(),
        environment: ServerEnvironment {
            server: "lxd".to_string(),
            server_name: "node1".to_string(),
            server_version: version.to_string(),
            server_clustered: clustered,
        },
    }
}

/// Server info as reported by an Incus daemon.
#[must_use]
pub fn incus_server(name: &str) -> ServerInfo {
    ServerInfo {
        config: BTreeMap::new(),
        environment: ServerEnvironment {
            server: "incus".to_string(),
            server_name: name.to_string(),
            server_version: "6.0.0".to_string(),
            server_clustered: false,
        },
    }
}

/// Attach an OVN northbound address to a server info payload.
#[must_use]
pub fn with_ovn(mut info: ServerInfo, northbound: &str) -> ServerInfo {
    info.config.insert(
        OVN_NORTHBOUND_KEY.to_string(),
        Value::String(northbound.to_string()),
    );
    info
}

/// Build a storage pool descriptor from key/value pairs.
#[must_use]
pub fn pool(name: &str, driver: &str, config: &[(&str, &str)]) -> StoragePool {
    StoragePool {
        name: name.to_string(),
        driver: driver.to_string(),
        config: config
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect(),
    }
}

/// Build a cluster member entry.
#[must_use]
pub fn member(name: &str, status: MemberStatus, message: &str) -> ClusterMember {
    ClusterMember {
        server_name: name.to_string(),
        url: format!("https://{name}:8443"),
        status,
        message: message.to_string(),
    }
}
