use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use migrator_api_models::{MemberStatus, ServerInfo};
use migrator_app::cluster::{ClusterState, EVACUATED_MESSAGE, ONLINE_MESSAGE};
use migrator_app::daemons::{Daemon, DaemonPaths, SourceDaemon};
use migrator_app::database::{CheckedDatabase, DatabaseMigrator};
use migrator_app::prompt::ScriptedPrompter;
use migrator_app::{AppError, AppResult, Migration, MigrationDeps, Phase, PhaseStatus};
use migrator_client::{DaemonClient, UnixDaemonClient};
use migrator_config::{Flags, MigrationSettings, RetryPolicy};
use migrator_fsops::{HostOps, argv};
use migrator_test_support::fixtures::{
    incus_server, lxd_server, member, pool, temp_dir, with_ovn,
};
use migrator_test_support::{FakeDaemon, FakeDaemonState, HostEvent, RecordingHost};
use tempfile::TempDir;

#[derive(Debug)]
struct TestDaemon {
    name: &'static str,
    unit: &'static str,
    present: bool,
    paths: DaemonPaths,
    socket: PathBuf,
}

impl TestDaemon {
    fn service(&self, host: &dyn HostOps, operation: &'static str, verb: &str) -> AppResult<()> {
        host.run(&argv(&["systemctl", verb, self.unit]))
            .map(|_| ())
            .map_err(|source| AppError::FsOps { operation, source })
    }
}

#[async_trait]
impl Daemon for TestDaemon {
    fn name(&self) -> &'static str {
        self.name
    }

    fn present(&self) -> bool {
        self.present
    }

    fn paths(&self) -> AppResult<DaemonPaths> {
        Ok(self.paths.clone())
    }

    async fn connect(&self) -> AppResult<Arc<dyn DaemonClient>> {
        Ok(Arc::new(UnixDaemonClient::new(&self.socket)))
    }

    fn stop(&self, host: &dyn HostOps) -> AppResult<()> {
        self.service(host, "stop", "stop")
    }

    fn start(&self, host: &dyn HostOps) -> AppResult<()> {
        self.service(host, "start", "start")
    }
}

impl SourceDaemon for TestDaemon {
    fn purge(&self, host: &dyn HostOps) -> AppResult<()> {
        host.run(&argv(&["apt-get", "remove", "--purge", "lxd"]))
            .map(|_| ())
            .map_err(|source| AppError::FsOps {
                operation: "purge",
                source,
            })
    }
}

#[derive(Debug, Default)]
struct RecordingDatabase {
    dirs: Mutex<Vec<PathBuf>>,
}

impl RecordingDatabase {
    fn dirs(&self) -> Vec<PathBuf> {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DatabaseMigrator for RecordingDatabase {
    fn migrate(&self, dir: &Path) -> AppResult<Vec<CheckedDatabase>> {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(dir.to_path_buf());
        Ok(Vec::new())
    }
}

fn paths(root: &Path, name: &str) -> DaemonPaths {
    DaemonPaths {
        daemon: root.join("var/lib").join(name),
        logs: root.join("var/log").join(name),
        cache: root.join("var/cache").join(name),
    }
}

struct Harness {
    root: TempDir,
    source_paths: DaemonPaths,
    target_paths: DaemonPaths,
    source: FakeDaemon,
    target: FakeDaemon,
    host: Arc<RecordingHost>,
    prompter: Arc<ScriptedPrompter>,
    database: Arc<RecordingDatabase>,
    source_present: bool,
}

impl Harness {
    fn new(source_info: ServerInfo, host: RecordingHost, answers: Vec<bool>) -> Result<Self> {
        let root = temp_dir()?;
        let source_paths = paths(root.path(), "lxd");
        let target_paths = paths(root.path(), "incus");

        let pool_dir = source_paths
            .daemon
            .join("storage-pools/default/containers/c1");
        fs::create_dir_all(&pool_dir)?;
        fs::create_dir_all(source_paths.daemon.join("containers"))?;
        symlink(&pool_dir, source_paths.daemon.join("containers/c1"))?;
        fs::create_dir_all(source_paths.daemon.join("devices/c1"))?;
        fs::create_dir_all(source_paths.daemon.join("database/global"))?;
        fs::create_dir_all(&source_paths.logs)?;
        fs::write(source_paths.logs.join("lxd.log"), "started\n")?;
        fs::create_dir_all(target_paths.daemon.join("stale"))?;

        let source = FakeDaemon::start(FakeDaemonState::new(source_info))?;
        let target = FakeDaemon::start(FakeDaemonState::new(incus_server("node1")))?;
        Ok(Self {
            root,
            source_paths,
            target_paths,
            source,
            target,
            host: Arc::new(host),
            prompter: Arc::new(ScriptedPrompter::new(answers)),
            database: Arc::new(RecordingDatabase::default()),
            source_present: true,
        })
    }

    fn with_host(self, host: RecordingHost) -> Self {
        Self {
            host: Arc::new(host),
            ..self
        }
    }

    fn pool_source(&self) -> String {
        self.source_paths
            .daemon
            .join("storage-pools/default")
            .display()
            .to_string()
    }

    fn migration(&self, settings: MigrationSettings) -> Migration {
        let source = TestDaemon {
            name: "systemd",
            unit: "lxd",
            present: self.source_present,
            paths: self.source_paths.clone(),
            socket: self.source.socket_path().to_path_buf(),
        };
        let target = TestDaemon {
            name: "systemd",
            unit: "incus",
            present: true,
            paths: self.target_paths.clone(),
            socket: self.target.socket_path().to_path_buf(),
        };
        let host: Arc<dyn HostOps> = self.host.clone();
        Migration::new(
            MigrationDeps {
                sources: vec![Arc::new(source)],
                targets: vec![Arc::new(target)],
                host,
                prompter: self.prompter.clone(),
                database: self.database.clone(),
                root: self.root.path().to_path_buf(),
            },
            settings,
        )
    }
}

fn flags(assume_yes: bool, cluster_member: bool) -> MigrationSettings {
    MigrationSettings::new(Flags {
        assume_yes,
        cluster_member,
    })
}

#[tokio::test]
async fn standalone_run_with_yes_goes_straight_from_confirm_to_stop() -> Result<()> {
    let harness = Harness::new(lxd_server("5.21.1", false), RecordingHost::new(), vec![])?;
    let source_pool = harness.pool_source();
    harness.source.state().storage_pools =
        vec![pool("default", "dir", &[("source", &source_pool)])];

    let mut migration = harness.migration(flags(true, false));
    migration.run().await?;

    let report = migration.report();
    let order: Vec<Phase> = report.phases().iter().map(|record| record.phase).collect();
    assert_eq!(order, Phase::ALL.to_vec());
    assert_eq!(
        report.skipped(),
        vec![Phase::Confirm, Phase::Evacuate, Phase::Converge, Phase::Restore]
    );
    assert_eq!(report.status(Phase::Stop), Some(PhaseStatus::Completed));
    assert_eq!(migration.cluster_state(), ClusterState::Unconverged);

    let source = &harness.source_paths;
    let target = &harness.target_paths;
    assert_eq!(
        harness.host.commands(),
        vec![
            "systemctl stop lxd".to_string(),
            "systemctl stop incus".to_string(),
            format!("mv {} {}", source.logs.display(), target.logs.display()),
            format!("mv {} {}", source.daemon.display(), target.daemon.display()),
            "systemctl start incus".to_string(),
            "apt-get remove --purge lxd".to_string(),
        ]
    );
    assert!(harness.prompter.asked().is_empty());
    assert!(harness.source.state().state_requests.is_empty());

    let patch = target.daemon.join("database/patch.global.sql");
    let expected_source = target.daemon.join("storage-pools/default");
    assert_eq!(
        fs::read_to_string(&patch)?,
        format!(
            "UPDATE storage_pools_config SET value='{}' WHERE value='{source_pool}';\n",
            expected_source.display()
        )
    );
    assert_eq!(fs::metadata(&patch)?.permissions().mode() & 0o777, 0o600);
    assert_eq!(
        fs::read_link(target.daemon.join("containers/c1"))?,
        target.daemon.join("storage-pools/default/containers/c1")
    );
    assert!(!target.daemon.join("devices").exists());
    assert!(!target.daemon.join("stale").exists());
    assert!(target.logs.join("lxd.log").is_file());
    assert_eq!(harness.database.dirs(), vec![target.database()]);
    Ok(())
}

#[tokio::test]
async fn cluster_member_runs_only_local_phases() -> Result<()> {
    let harness = Harness::new(lxd_server("5.21.1", true), RecordingHost::new(), vec![])?;
    harness.source.state().members = vec![member("node1", MemberStatus::Online, ONLINE_MESSAGE)];

    let mut migration = harness.migration(flags(false, true));
    migration.run().await?;

    assert_eq!(
        migration.report().completed(),
        vec![
            Phase::Discover,
            Phase::Connect,
            Phase::Stop,
            Phase::Unmount,
            Phase::Wipe,
            Phase::Move,
            Phase::MigrateDatabase,
            Phase::Cleanup,
            Phase::StartTarget,
            Phase::ValidateTarget,
        ]
    );
    assert!(harness.prompter.asked().is_empty());
    assert!(harness.source.state().state_requests.is_empty());
    assert!(harness.target.state().state_requests.is_empty());
    assert!(
        !harness
            .host
            .commands()
            .iter()
            .any(|command| command.starts_with("apt-get"))
    );
    Ok(())
}

#[tokio::test]
async fn cluster_member_with_ovn_rewrites_local_switch_only() -> Result<()> {
    let host = RecordingHost::new()
        .with_output(
            "ovs-vsctl --if-exists get open_vswitch . external_ids:ovn-bridge-mappings",
            "\"physnet1:lxdovn3\"\n",
        )
        .with_output("ovs-vsctl list-br", "br-int\nlxdovn3\n");
    let info = with_ovn(lxd_server("5.21.1", true), "tcp:10.0.0.1:6641");
    let harness = Harness::new(info, host, vec![])?;

    let mut migration = harness.migration(flags(false, true));
    migration.run().await?;

    assert_eq!(
        migration.report().status(Phase::ApplyRewrites),
        Some(PhaseStatus::Completed)
    );
    let commands = harness.host.commands();
    assert!(commands.contains(&"ovs-vsctl --if-exists del-br lxdovn3".to_string()));
    assert!(
        !commands
            .iter()
            .any(|command| command.starts_with("ovn-nbctl"))
    );
    assert!(
        !harness
            .target_paths
            .daemon
            .join("database/patch.global.sql")
            .exists()
    );
    Ok(())
}

#[tokio::test]
async fn mounted_state_directory_is_bind_mounted_not_renamed() -> Result<()> {
    let harness = Harness::new(lxd_server("5.0.3", false), RecordingHost::new(), vec![])?;
    let host = RecordingHost::new().with_mount_point(&harness.source_paths.daemon);
    let harness = harness.with_host(host);

    let mut migration = harness.migration(flags(true, false));
    migration.run().await?;

    let source = &harness.source_paths.daemon;
    let target = &harness.target_paths.daemon;
    let events = harness.host.events();
    assert!(events.contains(&HostEvent::BindMount {
        source: source.clone(),
        target: target.clone(),
    }));
    assert!(events.contains(&HostEvent::Detach(source.clone())));
    assert!(
        !harness
            .host
            .commands()
            .iter()
            .any(|command| command.starts_with(&format!("mv {}", source.display())))
    );
    assert_eq!(fs::metadata(target)?.permissions().mode() & 0o777, 0o711);
    assert_eq!(
        migration.report().status(Phase::ApplyRewrites),
        Some(PhaseStatus::Skipped)
    );
    Ok(())
}

#[tokio::test]
async fn clustered_primary_evacuates_converges_and_restores() -> Result<()> {
    let harness = Harness::new(lxd_server("5.21.1", true), RecordingHost::new(), vec![])?;
    let source_pool = harness.pool_source();
    {
        let mut source = harness.source.state();
        source.members = vec![
            member("node1", MemberStatus::Online, ONLINE_MESSAGE),
            member("node2", MemberStatus::Online, ONLINE_MESSAGE),
        ];
        for name in ["node1", "node2"] {
            source.member_pools.insert(
                name.to_string(),
                vec![pool("default", "dir", &[("source", &source_pool)])],
            );
        }
    }
    harness.target.state().members = vec![
        member("node1", MemberStatus::Online, ONLINE_MESSAGE),
        member("node2", MemberStatus::Evacuated, EVACUATED_MESSAGE),
    ];

    let mut settings = flags(true, false);
    settings.retry = RetryPolicy::every(Duration::from_millis(10)).with_max_attempts(5);
    let mut migration = harness.migration(settings);
    migration.run().await?;

    assert_eq!(migration.cluster_state(), ClusterState::Restored);
    assert_eq!(harness.source.state().state_requests.len(), 2);
    assert_eq!(harness.target.state().state_requests.len(), 2);
    assert_eq!(migration.report().skipped(), vec![Phase::Confirm]);
    let patch = fs::read_to_string(
        harness
            .target_paths
            .daemon
            .join("database/patch.global.sql"),
    )?;
    assert_eq!(patch.lines().count(), 1);
    Ok(())
}

#[tokio::test]
async fn cluster_no_evacuate_skips_evacuation_only() -> Result<()> {
    let harness = Harness::new(lxd_server("5.21.1", true), RecordingHost::new(), vec![])?;
    harness.source.state().members = vec![member("node1", MemberStatus::Online, ONLINE_MESSAGE)];
    harness.target.state().members = vec![member("node1", MemberStatus::Online, ONLINE_MESSAGE)];

    let mut settings = flags(true, false);
    settings.cluster_no_evacuate = true;
    settings.retry = RetryPolicy::every(Duration::from_millis(10));
    let mut migration = harness.migration(settings);
    migration.run().await?;

    assert_eq!(
        migration.report().status(Phase::Evacuate),
        Some(PhaseStatus::Skipped)
    );
    assert!(harness.source.state().state_requests.is_empty());
    assert_eq!(harness.target.state().state_requests.len(), 1);
    Ok(())
}

#[tokio::test]
async fn declining_the_migration_touches_nothing() -> Result<()> {
    let harness = Harness::new(lxd_server("5.21.1", false), RecordingHost::new(), vec![false])?;

    let mut migration = harness.migration(flags(false, false));
    let err = migration
        .run()
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected the run to be declined"))?;

    assert!(matches!(err, AppError::Declined { .. }));
    assert_eq!(
        harness.prompter.asked(),
        vec!["Proceed with the migration? [default=no]: "]
    );
    assert_eq!(
        migration.report().status(Phase::Confirm),
        Some(PhaseStatus::Failed)
    );
    assert!(harness.host.commands().is_empty());
    assert!(harness.source_paths.daemon.is_dir());
    Ok(())
}

#[tokio::test]
async fn declining_the_uninstall_fails_after_migration() -> Result<()> {
    let harness = Harness::new(
        lxd_server("5.21.1", false),
        RecordingHost::new(),
        vec![true, false],
    )?;

    let mut migration = harness.migration(flags(false, false));
    let result = migration.run().await;

    assert!(matches!(
        result,
        Err(AppError::Declined {
            prompt: "Uninstall the LXD package?"
        })
    ));
    assert_eq!(
        migration.report().status(Phase::ValidateTarget),
        Some(PhaseStatus::Completed)
    );
    assert_eq!(
        migration.report().status(Phase::Purge),
        Some(PhaseStatus::Failed)
    );
    assert!(
        !harness
            .host
            .commands()
            .iter()
            .any(|command| command.starts_with("apt-get"))
    );
    Ok(())
}

#[tokio::test]
async fn validation_failures_abort_before_stopping() -> Result<()> {
    let harness = Harness::new(lxd_server("3.0.4", false), RecordingHost::new(), vec![])?;
    harness.target.state().instances = vec!["leftover".to_string()];

    let mut migration = harness.migration(flags(true, false));
    let result = migration.run().await;

    let Err(AppError::Validation { violations }) = result else {
        anyhow::bail!("expected a validation error");
    };
    assert_eq!(violations.len(), 2);
    assert!(harness.host.commands().is_empty());
    assert_eq!(migration.report().status(Phase::Stop), None);
    Ok(())
}

#[tokio::test]
async fn stop_failures_propagate() -> Result<()> {
    let harness = Harness::new(
        lxd_server("5.21.1", false),
        RecordingHost::new().failing("systemctl stop incus"),
        vec![],
    )?;

    let mut migration = harness.migration(flags(true, false));
    let result = migration.run().await;

    assert!(matches!(
        result,
        Err(AppError::FsOps {
            operation: "stop",
            ..
        })
    ));
    assert_eq!(
        migration.report().status(Phase::Stop),
        Some(PhaseStatus::Failed)
    );
    assert_eq!(migration.report().status(Phase::Wipe), None);
    assert!(harness.target_paths.daemon.join("stale").exists());
    Ok(())
}

#[tokio::test]
async fn missing_source_is_a_precondition_failure() -> Result<()> {
    let mut harness = Harness::new(lxd_server("5.21.1", false), RecordingHost::new(), vec![])?;
    harness.source_present = false;

    let mut migration = harness.migration(flags(true, false));
    let result = migration.run().await;

    assert!(matches!(result, Err(AppError::Precondition { .. })));
    assert_eq!(
        migration.report().status(Phase::Discover),
        Some(PhaseStatus::Failed)
    );
    Ok(())
}
