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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared REST DTOs for the LXD and Incus daemon APIs.
//!
//! Both daemons expose the same `/1.0` surface, so a single set of types is
//! used for the source and the target. Only the fields the migration reads are
//! modelled; unknown fields are ignored on decode.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server configuration key advertising the OVN northbound database address.
pub const OVN_NORTHBOUND_KEY: &str = "network.ovn.northbound_connection";

/// Envelope wrapping every daemon response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    /// Response flavour (`sync`, `async` or `error`).
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Textual status for sync/async responses.
    #[serde(default)]
    pub status: String,
    /// Numeric status for sync/async responses.
    #[serde(default)]
    pub status_code: u16,
    /// Operation URL for async responses.
    #[serde(default)]
    pub operation: String,
    /// Error code for error responses.
    #[serde(default)]
    pub error_code: u16,
    /// Error message for error responses.
    #[serde(default)]
    pub error: String,
    /// Response payload.
    #[serde(default)]
    pub metadata: Value,
}

impl ResponseEnvelope {
    /// Build a synchronous success envelope around a payload.
    #[must_use]
    pub fn sync(metadata: Value) -> Self {
        Self {
            kind: ResponseKind::Sync,
            status: "Success".to_string(),
            status_code: 200,
            operation: String::new(),
            error_code: 0,
            error: String::new(),
            metadata,
        }
    }

    /// Build an asynchronous envelope pointing at an operation URL.
    #[must_use]
    pub fn async_operation(operation: impl Into<String>, metadata: Value) -> Self {
        Self {
            kind: ResponseKind::Async,
            status: "Operation created".to_string(),
            status_code: 100,
            operation: operation.into(),
            error_code: 0,
            error: String::new(),
            metadata,
        }
    }

    /// Build an error envelope.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            status: String::new(),
            status_code: 0,
            operation: String::new(),
            error_code: code,
            error: message.into(),
            metadata: Value::Null,
        }
    }
}

/// Response flavours used by the daemon REST API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Synchronous result.
    Sync,
    /// Background operation was created.
    Async,
    /// Request failed.
    Error,
}

/// Result of `GET /1.0`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    /// Server-wide configuration keys.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    /// Runtime environment details.
    #[serde(default)]
    pub environment: ServerEnvironment,
}

impl ServerInfo {
    /// OVN northbound connection string, when configured and non-empty.
    #[must_use]
    pub fn ovn_northbound(&self) -> Option<&str> {
        self.config
            .get(OVN_NORTHBOUND_KEY)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Environment section of the server info.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerEnvironment {
    /// Implementation identity (`lxd` or `incus`).
    #[serde(default)]
    pub server: String,
    /// Host name of the answering member.
    #[serde(default)]
    pub server_name: String,
    /// Daemon version string.
    #[serde(default)]
    pub server_version: String,
    /// Whether the daemon is part of a cluster.
    #[serde(default)]
    pub server_clustered: bool,
}

/// Storage pool descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoragePool {
    /// Pool name.
    pub name: String,
    /// Storage driver (`dir`, `zfs`, `ceph`, ...).
    pub driver: String,
    /// Driver configuration.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl StoragePool {
    /// Look up a configuration key.
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}

/// Cluster member as reported by `GET /1.0/cluster/members?recursion=1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMember {
    /// Member name.
    pub server_name: String,
    /// Member API URL.
    #[serde(default)]
    pub url: String,
    /// Member status.
    pub status: MemberStatus,
    /// Human readable status detail.
    #[serde(default)]
    pub message: String,
}

/// Cluster member health states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemberStatus {
    /// Member is serving workloads.
    Online,
    /// Member has been drained for maintenance.
    Evacuated,
    /// Member is not reachable.
    Offline,
    /// Member is blocked by a version mismatch.
    Blocked,
    /// Any status this tool does not know about.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Online => "Online",
            Self::Evacuated => "Evacuated",
            Self::Offline => "Offline",
            Self::Blocked => "Blocked",
            Self::Unknown => "Unknown",
        };
        formatter.write_str(label)
    }
}

/// Request body for `POST /1.0/cluster/members/<name>/state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMemberStatePost {
    /// Requested transition.
    pub action: MemberStateAction,
    /// Evacuation mode (`stop`, `migrate`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl ClusterMemberStatePost {
    /// Evacuate a member, stopping its workloads in place.
    #[must_use]
    pub fn evacuate_stop() -> Self {
        Self {
            action: MemberStateAction::Evacuate,
            mode: Some("stop".to_string()),
        }
    }

    /// Bring evacuated workloads back.
    #[must_use]
    pub const fn restore() -> Self {
        Self {
            action: MemberStateAction::Restore,
            mode: None,
        }
    }
}

/// Cluster member transitions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberStateAction {
    /// Drain the member.
    Evacuate,
    /// Undo a previous evacuation.
    Restore,
}

/// Background operation state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    /// Operation identifier.
    #[serde(default)]
    pub id: String,
    /// Textual status (`Success`, `Failure`, ...).
    #[serde(default)]
    pub status: String,
    /// Numeric status; 200 means success.
    #[serde(default)]
    pub status_code: u16,
    /// Failure detail.
    #[serde(default)]
    pub err: String,
}

impl Operation {
    /// Numeric status reported by successful operations.
    pub const SUCCESS: u16 = 200;

    /// Whether the operation finished successfully.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.status_code == Self::SUCCESS
    }
}

/// Network descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Network {
    /// Network name.
    pub name: String,
    /// Whether the daemon manages this network.
    #[serde(default)]
    pub managed: bool,
    /// Network type (`bridge`, `ovn`, `physical`, ...).
    #[serde(rename = "type", default)]
    pub kind: String,
}
