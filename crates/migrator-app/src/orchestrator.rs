//! Migration phase sequencer.
//!
//! Phases run strictly in order and each one is a hard barrier: the first error
//! aborts the run and nothing is rolled back. Every phase is recorded in the
//! [`MigrationReport`], including the ones that do not apply to this run.

use std::path::PathBuf;
use std::sync::Arc;

use migrator_client::DaemonClient;
use migrator_config::MigrationSettings;
use migrator_fsops::{
    HostOps, MoveOutcome, detach_all, move_dir, relocate_state, remove_obsolete, repair_symlinks,
    wipe_dirs, write_private_file,
};
use tracing::{error, info, warn};

use crate::cluster::{ClusterCoordinator, ClusterState};
use crate::daemons::{Daemon, DaemonPaths, SourceDaemon, discover};
use crate::database::DatabaseMigrator;
use crate::error::{AppError, AppResult};
use crate::prompt::Prompter;
use crate::report::{MigrationReport, Phase, PhaseOutcome, PhaseStatus};
use crate::rewrite::{MigrationPlan, RewritePlanner};
use crate::validate;

/// Name of the database patch applied by the target on its next start.
pub const PATCH_FILE: &str = "patch.global.sql";

const RUNTIME_MOUNTS: &[&str] = &["guestapi", "shmounts"];
const OBSOLETE_SYMLINKS: &[&str] = &["backups", "images"];
const OBSOLETE_DIRS: &[&str] = &["devices", "devlxd", "security", "shmounts"];
const INSTANCE_DIRS: &[&str] = &[
    "containers",
    "containers-snapshots",
    "snapshots",
    "virtual-machines",
    "virtual-machines-snapshots",
];

const PROCEED_PROMPT: &str = "Proceed with the migration? [default=no]: ";
const HANDOFF_PROMPT: &str = "The command has been started on all other servers? [default=no]: ";
const PURGE_PROMPT: &str = "Uninstall the LXD package? [default=no]: ";

/// Collaborators injected into a [`Migration`].
pub struct MigrationDeps {
    /// Source candidates in priority order.
    pub sources: Vec<Arc<dyn SourceDaemon>>,
    /// Target candidates in priority order.
    pub targets: Vec<Arc<dyn Daemon>>,
    /// Commands and mounts.
    pub host: Arc<dyn HostOps>,
    /// Operator confirmations.
    pub prompter: Arc<dyn Prompter>,
    /// Database step.
    pub database: Arc<dyn DatabaseMigrator>,
    /// Filesystem prefix for host tool detection.
    pub root: PathBuf,
}

struct Sides {
    source: Arc<dyn SourceDaemon>,
    target: Arc<dyn Daemon>,
    source_paths: DaemonPaths,
    target_paths: DaemonPaths,
}

struct Connections {
    source: Arc<dyn DaemonClient>,
    target: Arc<dyn DaemonClient>,
    clustered: bool,
    ovn_northbound: Option<String>,
}

/// One migration run.
pub struct Migration {
    deps: MigrationDeps,
    settings: MigrationSettings,
    coordinator: ClusterCoordinator,
    report: MigrationReport,
}

impl Migration {
    /// Prepare a run; nothing happens until [`Migration::run`].
    #[must_use]
    pub fn new(deps: MigrationDeps, settings: MigrationSettings) -> Self {
        let coordinator = ClusterCoordinator::new(settings.retry);
        Self {
            deps,
            settings,
            coordinator,
            report: MigrationReport::default(),
        }
    }

    /// Phases recorded so far.
    #[must_use]
    pub const fn report(&self) -> &MigrationReport {
        &self.report
    }

    /// Cluster protocol state reached.
    #[must_use]
    pub const fn cluster_state(&self) -> ClusterState {
        self.coordinator.state()
    }

    /// Run every phase.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing phase, or [`AppError::Declined`]
    /// when the operator answers "no".
    pub async fn run(&mut self) -> AppResult<()> {
        let result = self.execute().await;
        let completed = self.report.completed().len();
        match &result {
            Ok(()) => info!(completed, "migration finished"),
            Err(err) => error!(completed, error = %err, "migration aborted"),
        }
        match serde_json::to_string(&self.report) {
            Ok(report) => info!(%report, "migration report"),
            Err(err) => warn!(error = %err, "migration report could not be encoded"),
        }
        result
    }

    fn begin(&mut self, phase: Phase) {
        self.report.update_phase(phase, PhaseStatus::Started, None);
        info!(phase = phase.as_str(), "phase started");
    }

    fn settle<T>(&mut self, phase: Phase, result: AppResult<(T, PhaseOutcome)>) -> AppResult<T> {
        match result {
            Ok((value, outcome)) => {
                let status = outcome.status();
                self.report.update_phase(phase, status, outcome.into_detail());
                info!(
                    phase = phase.as_str(),
                    status = status.as_str(),
                    "phase finished"
                );
                Ok(value)
            }
            Err(err) => {
                self.report
                    .update_phase(phase, PhaseStatus::Failed, Some(err.to_string()));
                error!(phase = phase.as_str(), error = %err, "phase failed");
                Err(err)
            }
        }
    }

    fn settle_unit(&mut self, phase: Phase, result: AppResult<PhaseOutcome>) -> AppResult<()> {
        self.settle(phase, result.map(|outcome| ((), outcome)))
    }

    fn skip(&mut self, phase: Phase, reason: &'static str) {
        let outcome = PhaseOutcome::Skipped(reason);
        self.report
            .update_phase(phase, outcome.status(), outcome.into_detail());
        info!(phase = phase.as_str(), reason, "phase skipped");
    }

    const fn is_member(&self) -> bool {
        self.settings.is_cluster_member()
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(&mut self) -> AppResult<()> {
        self.begin(Phase::Discover);
        let result = self.discover();
        let sides = self.settle(Phase::Discover, result)?;

        self.begin(Phase::Connect);
        let result = self.connect(&sides).await;
        let connections = self.settle(Phase::Connect, result)?;

        if self.is_member() {
            self.skip(Phase::Validate, "cluster member");
        } else {
            self.begin(Phase::Validate);
            let result = validate::preflight(&*connections.source, &*connections.target)
                .await
                .map(|()| PhaseOutcome::Completed(None));
            self.settle_unit(Phase::Validate, result)?;
        }

        let plan = if self.is_member() && connections.ovn_northbound.is_none() {
            self.skip(Phase::GatherRewrites, "no OVN deployment");
            MigrationPlan::default()
        } else {
            self.begin(Phase::GatherRewrites);
            let result = self.gather_rewrites(&sides, &connections).await;
            self.settle(Phase::GatherRewrites, result)?
        };

        if self.settings.flags.assume_yes {
            self.skip(Phase::Confirm, "--yes");
        } else if self.is_member() {
            self.skip(Phase::Confirm, "cluster member");
        } else {
            self.begin(Phase::Confirm);
            let result = self.confirm(connections.clustered);
            self.settle_unit(Phase::Confirm, result)?;
        }

        if !connections.clustered {
            self.skip(Phase::Evacuate, "not clustered");
        } else if self.is_member() {
            self.skip(Phase::Evacuate, "cluster member");
        } else if self.settings.cluster_no_evacuate {
            self.skip(Phase::Evacuate, "CLUSTER_NO_EVACUATE=1");
        } else {
            self.begin(Phase::Evacuate);
            println!("=> Stopping all workloads on the cluster");
            let result = self
                .coordinator
                .evacuate(&*connections.source)
                .await
                .map(|members| {
                    PhaseOutcome::Completed(Some(format!("{} member(s) evacuated", members.len())))
                });
            self.settle_unit(Phase::Evacuate, result)?;
        }

        self.begin(Phase::Stop);
        let result = self.stop(&sides);
        self.settle_unit(Phase::Stop, result)?;

        self.begin(Phase::Unmount);
        let result = Ok(self.unmount(&sides.target_paths));
        self.settle_unit(Phase::Unmount, result)?;

        self.begin(Phase::Wipe);
        println!("=> Wiping the target server");
        let paths = &sides.target_paths;
        let result = wipe_dirs(&[&paths.logs, &paths.cache, &paths.daemon])
            .map(|()| PhaseOutcome::Completed(None))
            .map_err(|err| AppError::fsops("wipe", err));
        self.settle_unit(Phase::Wipe, result)?;

        self.begin(Phase::Move);
        let result = self.move_data(&sides);
        self.settle_unit(Phase::Move, result)?;

        self.begin(Phase::MigrateDatabase);
        println!("=> Migrating database");
        let result = self
            .deps
            .database
            .migrate(&sides.target_paths.database())
            .map(|checked| {
                PhaseOutcome::Completed(Some(format!("{} database file(s) checked", checked.len())))
            });
        self.settle_unit(Phase::MigrateDatabase, result)?;

        if plan.is_empty() {
            self.skip(Phase::ApplyRewrites, "nothing to rewrite");
        } else {
            self.begin(Phase::ApplyRewrites);
            let result = self.apply_rewrites(&plan, &sides.target_paths);
            self.settle_unit(Phase::ApplyRewrites, result)?;
        }

        self.begin(Phase::Cleanup);
        let result = cleanup(&sides);
        self.settle_unit(Phase::Cleanup, result)?;

        self.begin(Phase::StartTarget);
        println!("=> Starting the target server");
        let result = sides
            .target
            .start(&*self.deps.host)
            .map(|()| PhaseOutcome::Completed(None));
        self.settle_unit(Phase::StartTarget, result)?;

        let coordinate = connections.clustered && !self.is_member();
        if coordinate {
            self.begin(Phase::Converge);
            let result = match self.hand_off() {
                Ok(()) => self
                    .coordinator
                    .await_convergence(&*connections.target)
                    .await
                    .map(|attempts| {
                        PhaseOutcome::Completed(Some(format!("converged after {attempts} poll(s)")))
                    }),
                Err(err) => Err(err),
            };
            self.settle_unit(Phase::Converge, result)?;

            self.begin(Phase::Restore);
            println!("=> Restoring the cluster");
            let result = self
                .coordinator
                .restore(&*connections.target)
                .await
                .map(|members| {
                    PhaseOutcome::Completed(Some(format!("{} member(s) restored", members.len())))
                });
            self.settle_unit(Phase::Restore, result)?;
        } else {
            let reason = if self.is_member() {
                "cluster member"
            } else {
                "not clustered"
            };
            self.skip(Phase::Converge, reason);
            self.skip(Phase::Restore, reason);
        }

        self.begin(Phase::ValidateTarget);
        println!("=> Checking the target server");
        let result = connections
            .target
            .server_info(None)
            .await
            .map(|info| {
                PhaseOutcome::Completed(Some(format!(
                    "{} {} on {}",
                    info.environment.server,
                    info.environment.server_version,
                    info.environment.server_name
                )))
            })
            .map_err(|err| AppError::client("validate target", err));
        self.settle_unit(Phase::ValidateTarget, result)?;

        if self.is_member() {
            self.skip(Phase::Purge, "cluster member");
        } else {
            self.begin(Phase::Purge);
            let result = self.purge(&sides);
            self.settle_unit(Phase::Purge, result)?;
        }
        Ok(())
    }

    fn discover(&self) -> AppResult<(Sides, PhaseOutcome)> {
        println!("=> Looking for source server");
        let source = discover(&self.deps.sources)
            .ok_or_else(|| AppError::precondition("No source server could be found"))?;
        println!("==> Detected: {}", source.name());

        println!("=> Looking for target server");
        let target = discover(&self.deps.targets)
            .ok_or_else(|| AppError::precondition("No target server could be found"))?;
        println!("==> Detected: {}", target.name());

        let source_paths = source.paths()?;
        let target_paths = target.paths()?;
        let detail = format!(
            "{} ({}) -> {} ({})",
            source.name(),
            source_paths.daemon.display(),
            target.name(),
            target_paths.daemon.display()
        );
        Ok((
            Sides {
                source,
                target,
                source_paths,
                target_paths,
            },
            PhaseOutcome::Completed(Some(detail)),
        ))
    }

    async fn connect(&self, sides: &Sides) -> AppResult<(Connections, PhaseOutcome)> {
        println!("=> Connecting to source server");
        let source = sides.source.connect().await?;
        println!("=> Connecting to the target server");
        let target = sides.target.connect().await?;

        let info = source
            .server_info(None)
            .await
            .map_err(|err| AppError::client("connect", err))?;
        let clustered = self.is_member() || info.environment.server_clustered;
        let ovn_northbound = info.ovn_northbound().map(str::to_string);
        let detail = format!("clustered={clustered} ovn={}", ovn_northbound.is_some());
        Ok((
            Connections {
                source,
                target,
                clustered,
                ovn_northbound,
            },
            PhaseOutcome::Completed(Some(detail)),
        ))
    }

    async fn gather_rewrites(
        &self,
        sides: &Sides,
        connections: &Connections,
    ) -> AppResult<(MigrationPlan, PhaseOutcome)> {
        let planner = RewritePlanner::new(&*self.deps.host, self.deps.root.clone());
        let northbound = connections.ovn_northbound.as_deref();
        let plan = if self.is_member() {
            planner.member_rewrites(northbound)?
        } else {
            let client = &*connections.source;
            let mut pools = Vec::new();
            if connections.clustered {
                let members = client
                    .cluster_members()
                    .await
                    .map_err(|err| AppError::client("storage pools", err))?;
                for member in members {
                    pools.extend(
                        client
                            .storage_pools(Some(&member.server_name))
                            .await
                            .map_err(|err| AppError::client("storage pools", err))?,
                    );
                }
            } else {
                pools = client
                    .storage_pools(None)
                    .await
                    .map_err(|err| AppError::client("storage pools", err))?;
            }
            planner.build_rewrites(&pools, &sides.source_paths, &sides.target_paths, northbound)?
        };
        let detail = format!(
            "{} statement(s), {} command(s)",
            plan.statements().len(),
            plan.commands().len()
        );
        Ok((plan, PhaseOutcome::Completed(Some(detail))))
    }

    fn confirm(&self, clustered: bool) -> AppResult<PhaseOutcome> {
        println!();
        println!("The migration is now ready to proceed.");
        if clustered {
            println!();
            println!("A cluster environment was detected.");
            println!(
                "Manual action will be needed on each of the server prior to Incus being functional."
            );
            if !self.settings.cluster_no_stop {
                println!("The migration will begin by shutting down instances on all servers.");
            }
            println!();
            println!(
                "It will then convert the current server over to Incus and then wait for the other servers to be converted."
            );
            println!();
            println!(
                "Do not attempt to manually run this tool on any of the other servers in the cluster."
            );
            println!("Instead this tool will be providing specific commands for each of the servers.");
        } else {
            println!("At this point, the source server and all its instances will be stopped.");
            println!("Instances will come back online once the migration is complete.");
        }
        println!();

        if self.deps.prompter.ask_bool(PROCEED_PROMPT, false)? {
            Ok(PhaseOutcome::Completed(None))
        } else {
            Err(AppError::Declined {
                prompt: "Proceed with the migration?",
            })
        }
    }

    fn stop(&self, sides: &Sides) -> AppResult<PhaseOutcome> {
        println!("=> Stopping the source server");
        sides.source.stop(&*self.deps.host)?;
        println!("=> Stopping the target server");
        sides.target.stop(&*self.deps.host)?;
        Ok(PhaseOutcome::Completed(None))
    }

    fn unmount(&self, target: &DaemonPaths) -> PhaseOutcome {
        let mounts: Vec<PathBuf> = RUNTIME_MOUNTS
            .iter()
            .map(|name| target.daemon.join(name))
            .collect();
        let detached = detach_all(&*self.deps.host, &mounts);
        PhaseOutcome::Completed(Some(format!("{} mount(s) detached", detached.len())))
    }

    fn move_data(&self, sides: &Sides) -> AppResult<PhaseOutcome> {
        println!("=> Migrating the data");
        let host = &*self.deps.host;
        let (source, target) = (&sides.source_paths, &sides.target_paths);

        for (from, to) in [(&source.logs, &target.logs), (&source.cache, &target.cache)] {
            let outcome = move_dir(host, from, to).map_err(|err| AppError::fsops("move", err))?;
            if outcome == MoveOutcome::Missing {
                warn!(path = %from.display(), "source directory missing; skipped");
            }
        }

        let outcome = relocate_state(host, &source.daemon, &target.daemon)
            .map_err(|err| AppError::fsops("move state", err))?;
        match outcome {
            MoveOutcome::BindMounted => {
                println!(
                    "WARNING: {} was detected to be a mountpoint.",
                    source.daemon.display()
                );
                println!(
                    "The migration logic has moved this mount to the new target path at {}.",
                    target.daemon.display()
                );
                println!(
                    "However it is your responsibility to modify your system settings to ensure this mount will be properly restored on reboot."
                );
                Ok(PhaseOutcome::Completed(Some(
                    "state directory bind-mounted".to_string(),
                )))
            }
            MoveOutcome::Moved => Ok(PhaseOutcome::Completed(None)),
            MoveOutcome::Missing => Err(AppError::Io {
                operation: "move state",
                path: Some(source.daemon.clone()),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }

    fn apply_rewrites(&self, plan: &MigrationPlan, target: &DaemonPaths) -> AppResult<PhaseOutcome> {
        if !plan.statements().is_empty() {
            println!("=> Writing database patch");
            let patch = target.database().join(PATCH_FILE);
            write_private_file(&patch, &plan.patch_contents())
                .map_err(|err| AppError::fsops("write patch", err))?;
        }
        if !plan.commands().is_empty() {
            println!("=> Running data migration commands");
            for command in plan.commands() {
                self.deps
                    .host
                    .run(command)
                    .map_err(|err| AppError::fsops("apply rewrites", err))?;
            }
        }
        Ok(PhaseOutcome::Completed(Some(format!(
            "{} statement(s), {} command(s)",
            plan.statements().len(),
            plan.commands().len()
        ))))
    }

    fn hand_off(&self) -> AppResult<()> {
        println!("=> Waiting for other cluster servers");
        println!();
        println!("Please run `lxd-to-incus --cluster-member` on all other servers in the cluster");
        println!();
        if !self.settings.flags.assume_yes {
            while !self.deps.prompter.ask_bool(HANDOFF_PROMPT, false)? {}
            println!();
        }
        println!("=> Waiting for cluster to be fully migrated");
        Ok(())
    }

    fn purge(&self, sides: &Sides) -> AppResult<PhaseOutcome> {
        if !self.settings.flags.assume_yes && !self.deps.prompter.ask_bool(PURGE_PROMPT, false)? {
            return Err(AppError::Declined {
                prompt: "Uninstall the LXD package?",
            });
        }
        println!("=> Uninstalling the source server");
        sides.source.purge(&*self.deps.host)?;
        Ok(PhaseOutcome::Completed(None))
    }
}

fn cleanup(sides: &Sides) -> AppResult<PhaseOutcome> {
    println!("=> Cleaning up target paths");
    let daemon = &sides.target_paths.daemon;
    let removed = remove_obsolete(daemon, OBSOLETE_SYMLINKS, OBSOLETE_DIRS)
        .map_err(|err| AppError::fsops("cleanup", err))?;
    let repaired = repair_symlinks(daemon, INSTANCE_DIRS, &sides.source_paths.daemon, daemon)
    .map_err(|err| AppError::fsops("repair symlinks", err))?;
    Ok(PhaseOutcome::Completed(Some(format!(
        "{} path(s) removed, {repaired} symlink(s) repaired",
        removed.len()
    ))))
}
