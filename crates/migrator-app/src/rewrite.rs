//! Configuration rewriting: the database statements and commands that retarget
//! the migrated state from LXD names and paths to Incus ones.
//!
//! The whole [`MigrationPlan`] is computed before anything destructive runs;
//! once built it is never modified.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use migrator_api_models::StoragePool;
use migrator_fsops::{HostOps, rebase};
use serde::Serialize;
use tracing::{debug, info};

use crate::daemons::DaemonPaths;
use crate::error::AppResult;
use crate::ovn::{self, OvnTools};

/// Statements and commands to apply to the migrated data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    statements: Vec<String>,
    commands: Vec<Vec<String>>,
}

impl MigrationPlan {
    /// SQL statements for the global database patch, in order.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// External commands, executed strictly in order.
    #[must_use]
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    /// Whether there is nothing to apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.commands.is_empty()
    }

    /// Contents of `patch.global.sql`: newline-joined with a trailing newline.
    #[must_use]
    pub fn patch_contents(&self) -> String {
        let mut contents = self.statements.join("\n");
        contents.push('\n');
        contents
    }
}

/// Accumulates a [`MigrationPlan`]. Duplicate statements are dropped.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    statements: Vec<String>,
    seen: BTreeSet<String>,
    commands: Vec<Vec<String>>,
}

impl PlanBuilder {
    /// Empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement unless an identical one is already queued.
    pub fn statement(&mut self, statement: String) {
        if self.seen.insert(statement.clone()) {
            self.statements.push(statement);
        }
    }

    /// Append a command.
    pub fn command(&mut self, argv: Vec<String>) {
        self.commands.push(argv);
    }

    /// Freeze the plan.
    #[must_use]
    pub fn build(self) -> MigrationPlan {
        MigrationPlan {
            statements: self.statements,
            commands: self.commands,
        }
    }
}

fn sql_quote(value: &str) -> String {
    value.replace('\'', "''")
}

fn config_or<'a>(pool: &'a StoragePool, key: &str, fallback: &'a str) -> &'a str {
    pool.config_value(key)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
}

/// Add the storage pool rewrites for `pools` to `plan`.
///
/// Ceph pools get one `rbd rename` per distinct RBD pool. Pools whose `source`
/// lives under the source state directory get a `storage_pools_config` update
/// pointing at the same location under the target state directory.
pub fn storage_rewrites(
    pools: &[StoragePool],
    source: &DaemonPaths,
    target: &DaemonPaths,
    plan: &mut PlanBuilder,
) {
    let mut renamed = BTreeSet::new();
    for pool in pools {
        if pool.driver == "ceph" {
            let cluster = config_or(pool, "ceph.cluster_name", "ceph");
            let client = config_or(pool, "ceph.user.name", "admin");
            let rbd_pool = config_or(pool, "ceph.osd.pool_name", &pool.name);
            if renamed.insert(rbd_pool.to_string()) {
                plan.command(vec![
                    "rbd".to_string(),
                    "rename".to_string(),
                    "--cluster".to_string(),
                    cluster.to_string(),
                    "--name".to_string(),
                    client.to_string(),
                    format!("{rbd_pool}/lxd_{rbd_pool}"),
                    format!("{rbd_pool}/incus_{rbd_pool}"),
                ]);
            }
        }

        let Some(old) = pool.config_value("source") else {
            continue;
        };
        let old_path = Path::new(old);
        if !old_path.is_absolute() {
            continue;
        }
        let Some(new_path) = rebase(old_path, &source.daemon, &target.daemon) else {
            debug!(pool = %pool.name, source = old, "pool source outside the state directory");
            continue;
        };
        let new = new_path.display().to_string();
        plan.statement(format!(
            "UPDATE storage_pools_config SET value='{}' WHERE value='{}';",
            sql_quote(&new),
            sql_quote(old)
        ));
    }
}

/// Computes a [`MigrationPlan`] using the host's OVN/OVS query tools.
pub struct RewritePlanner<'a> {
    host: &'a dyn HostOps,
    root: PathBuf,
}

impl<'a> RewritePlanner<'a> {
    /// Planner querying through `host`; `root` is the filesystem prefix used to
    /// detect MicroOVN.
    #[must_use]
    pub fn new(host: &'a dyn HostOps, root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            root: root.into(),
        }
    }

    /// Full plan for the primary invocation.
    ///
    /// # Errors
    ///
    /// Returns an error when an OVN or OVS query fails or returns unparsable output.
    pub fn build_rewrites(
        &self,
        pools: &[StoragePool],
        source: &DaemonPaths,
        target: &DaemonPaths,
        ovn_northbound: Option<&str>,
    ) -> AppResult<MigrationPlan> {
        let mut plan = PlanBuilder::new();
        storage_rewrites(pools, source, target, &mut plan);
        if let Some(northbound) = ovn_northbound {
            let southbound = ovn::southbound_address(self.host)?;
            let tools = OvnTools::detect(&self.root);
            ovn::ovn_convert(self.host, &tools, northbound, &southbound, &mut plan)?;
            ovn::ovs_convert(self.host, &mut plan)?;
        }
        let plan = plan.build();
        info!(
            statements = plan.statements().len(),
            commands = plan.commands().len(),
            "migration plan ready"
        );
        Ok(plan)
    }

    /// Local-only plan for a cluster member: the OVS conversion when OVN is in use.
    ///
    /// # Errors
    ///
    /// Returns an error when an OVS query fails or returns unparsable output.
    pub fn member_rewrites(&self, ovn_northbound: Option<&str>) -> AppResult<MigrationPlan> {
        let mut plan = PlanBuilder::new();
        if ovn_northbound.is_some() {
            ovn::ovs_convert(self.host, &mut plan)?;
        }
        Ok(plan.build())
    }
}
