//! OVN and OVS rewrites.
//!
//! Rows are read with the query tools' `--format=json` table output and every
//! `lxd-` name or `external_ids` key becomes an `incus-` one. Nothing is
//! changed here; the resulting commands are queued on a [`PlanBuilder`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::de::Error as _;
use serde_json::Value;
use tracing::{debug, info};

use migrator_fsops::{HostOps, argv};

use crate::error::{AppError, AppResult};
use crate::rewrite::PlanBuilder;

const NORTHBOUND_TABLES: &[&str] = &[
    "logical_switch",
    "logical_switch_port",
    "logical_router",
    "logical_router_port",
    "port_group",
    "address_set",
    "load_balancer",
];
const SOUTHBOUND_TABLES: &[&str] = &["port_binding"];
const OVS_TABLES: &[&str] = &["port", "interface"];

const SOURCE_PREFIX: &str = "lxd-";
const TARGET_PREFIX: &str = "incus-";
const SOURCE_BRIDGE_PREFIX: &str = "lxdovn";
const TARGET_BRIDGE_PREFIX: &str = "incusovn";
const BRIDGE_MAPPINGS_KEY: &str = "external_ids:ovn-bridge-mappings";

/// OVN client binaries for this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OvnTools {
    /// Northbound client.
    pub nbctl: String,
    /// Southbound client.
    pub sbctl: String,
}

impl OvnTools {
    /// MicroOVN's wrappers when the snap is installed under `root`, the plain tools otherwise.
    #[must_use]
    pub fn detect(root: &Path) -> Self {
        if root.join("snap/bin/microovn").exists() {
            Self {
                nbctl: "microovn.ovn-nbctl".to_string(),
                sbctl: "microovn.ovn-sbctl".to_string(),
            }
        } else {
            Self {
                nbctl: "ovn-nbctl".to_string(),
                sbctl: "ovn-sbctl".to_string(),
            }
        }
    }
}

/// One row of an OVSDB table dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OvsdbRow {
    /// Row UUID.
    pub uuid: String,
    /// `name` column, when the table has one and it is set.
    pub name: Option<String>,
    /// `external_ids` column.
    pub external_ids: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TableDump {
    headings: Vec<String>,
    data: Vec<Vec<Value>>,
}

/// Parse `--format=json list <table>` output. Empty output means no rows.
///
/// # Errors
///
/// Returns an error when the output is not a table dump or a row has no UUID.
pub fn parse_table(output: &str) -> serde_json::Result<Vec<OvsdbRow>> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let dump: TableDump = serde_json::from_str(output)?;
    let column = |name: &str| dump.headings.iter().position(|heading| heading == name);
    let uuid_column =
        column("_uuid").ok_or_else(|| serde_json::Error::custom("missing _uuid column"))?;
    let name_column = column("name");
    let ids_column = column("external_ids");

    dump.data
        .iter()
        .map(|cells| {
            let uuid = cells
                .get(uuid_column)
                .and_then(uuid_atom)
                .ok_or_else(|| serde_json::Error::custom("row without uuid"))?;
            Ok(OvsdbRow {
                uuid,
                name: name_column
                    .and_then(|index| cells.get(index))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                external_ids: ids_column
                    .and_then(|index| cells.get(index))
                    .map(map_atom)
                    .unwrap_or_default(),
            })
        })
        .collect()
}

fn uuid_atom(value: &Value) -> Option<String> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::String(id)]) if tag == "uuid" => Some(id.clone()),
        _ => None,
    }
}

fn map_atom(value: &Value) -> BTreeMap<String, String> {
    let Some([Value::String(tag), Value::Array(pairs)]) = value.as_array().map(Vec::as_slice)
    else {
        return BTreeMap::new();
    };
    if tag != "map" {
        return BTreeMap::new();
    }
    pairs
        .iter()
        .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(key), Value::String(value)]) => Some((key.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

fn renamed(value: &str) -> Option<String> {
    value
        .strip_prefix(SOURCE_PREFIX)
        .map(|rest| format!("{TARGET_PREFIX}{rest}"))
}

fn ovsdb_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn with_prefix(prefix: &[String], rest: &[&str]) -> Vec<String> {
    prefix
        .iter()
        .cloned()
        .chain(rest.iter().map(|part| (*part).to_string()))
        .collect()
}

fn list_table(
    host: &dyn HostOps,
    prefix: &[String],
    table: &str,
    operation: &'static str,
) -> AppResult<Vec<OvsdbRow>> {
    let output = host
        .run(&with_prefix(prefix, &["--format=json", "list", table]))
        .map_err(|err| AppError::fsops(operation, err))?;
    parse_table(&output).map_err(|err| AppError::payload(operation, err))
}

fn convert_rows(prefix: &[String], table: &str, rows: &[OvsdbRow], plan: &mut PlanBuilder) {
    for row in rows {
        if let Some(name) = row.name.as_deref().and_then(renamed) {
            plan.command(with_prefix(
                prefix,
                &["set", table, &row.uuid, &format!("name={name}")],
            ));
        }
        for (key, value) in &row.external_ids {
            let Some(new_key) = renamed(key) else {
                continue;
            };
            plan.command(with_prefix(
                prefix,
                &[
                    "set",
                    table,
                    &row.uuid,
                    &format!("external_ids:{new_key}={}", ovsdb_string(value)),
                ],
            ));
            plan.command(with_prefix(
                prefix,
                &["remove", table, &row.uuid, "external_ids", key],
            ));
        }
    }
}

fn unquote(output: &str) -> String {
    output.trim().replace('"', "")
}

/// Southbound database address configured on the local chassis.
///
/// # Errors
///
/// Returns an error when `ovs-vsctl` fails.
pub fn southbound_address(host: &dyn HostOps) -> AppResult<String> {
    let output = host
        .run(&argv(&[
            "ovs-vsctl",
            "get",
            "open_vswitch",
            ".",
            "external_ids:ovn-remote",
        ]))
        .map_err(|err| AppError::fsops("ovn southbound address", err))?;
    Ok(unquote(&output))
}

/// Queue the northbound and southbound database rewrites.
///
/// # Errors
///
/// Returns an error when a table listing fails or cannot be parsed.
pub fn ovn_convert(
    host: &dyn HostOps,
    tools: &OvnTools,
    northbound: &str,
    southbound: &str,
    plan: &mut PlanBuilder,
) -> AppResult<()> {
    let nb = vec![tools.nbctl.clone(), format!("--db={northbound}")];
    for table in NORTHBOUND_TABLES {
        let rows = list_table(host, &nb, table, "ovn northbound list")?;
        convert_rows(&nb, table, &rows, plan);
    }
    let sb = vec![tools.sbctl.clone(), format!("--db={southbound}")];
    for table in SOUTHBOUND_TABLES {
        let rows = list_table(host, &sb, table, "ovn southbound list")?;
        convert_rows(&sb, table, &rows, plan);
    }
    info!(northbound, southbound, "ovn database rewrites planned");
    Ok(())
}

/// Queue the local Open vSwitch rewrites.
///
/// # Errors
///
/// Returns an error when an `ovs-vsctl` query fails or cannot be parsed.
pub fn ovs_convert(host: &dyn HostOps, plan: &mut PlanBuilder) -> AppResult<()> {
    let vsctl = argv(&["ovs-vsctl"]);
    for table in OVS_TABLES {
        let prefix = argv(&["ovs-vsctl", "--columns=_uuid,name,external_ids"]);
        let rows = list_table(host, &prefix, table, "ovs list")?;
        convert_rows(&vsctl, table, &rows, plan);
    }

    let mappings = host
        .run(&argv(&[
            "ovs-vsctl",
            "--if-exists",
            "get",
            "open_vswitch",
            ".",
            BRIDGE_MAPPINGS_KEY,
        ]))
        .map_err(|err| AppError::fsops("ovs bridge mappings", err))?;
    let mappings = unquote(&mappings);
    if let Some(rewritten) = rewrite_bridge_mappings(&mappings) {
        debug!(from = %mappings, to = %rewritten, "bridge mappings rewritten");
        plan.command(argv(&[
            "ovs-vsctl",
            "set",
            "open_vswitch",
            ".",
            &format!("{BRIDGE_MAPPINGS_KEY}={}", ovsdb_string(&rewritten)),
        ]));
    }

    let bridges = host
        .run(&argv(&["ovs-vsctl", "list-br"]))
        .map_err(|err| AppError::fsops("ovs list bridges", err))?;
    for bridge in bridges
        .lines()
        .map(str::trim)
        .filter(|bridge| bridge.starts_with(SOURCE_BRIDGE_PREFIX))
    {
        plan.command(argv(&["ovs-vsctl", "--if-exists", "del-br", bridge]));
    }
    Ok(())
}

/// Rename `lxdovn*` bridges in a `physnet:bridge[,physnet:bridge]` list.
/// `None` when nothing changes.
#[must_use]
pub fn rewrite_bridge_mappings(mappings: &str) -> Option<String> {
    let mut changed = false;
    let entries: Vec<String> = mappings
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((network, bridge)) => match bridge.strip_prefix(SOURCE_BRIDGE_PREFIX) {
                Some(suffix) => {
                    changed = true;
                    format!("{network}:{TARGET_BRIDGE_PREFIX}{suffix}")
                }
                None => entry.to_string(),
            },
            None => entry.to_string(),
        })
        .collect();
    changed.then(|| entries.join(","))
}
