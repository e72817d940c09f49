//! Source and target daemon installations.
//!
//! Each supported packaging of LXD (source) and Incus (target) is a
//! [`ServiceCandidate`]: a presence probe, a directory layout and the service
//! manager commands that stop, start or uninstall it. Discovery walks an
//! ordered candidate list and picks the first installation that is present;
//! connecting is a separate step.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use migrator_client::{DaemonClient, UnixDaemonClient};
use migrator_fsops::{HostOps, argv};
use tracing::info;

use crate::error::{AppError, AppResult};

/// Socket file inside a daemon state directory.
pub const SOCKET_NAME: &str = "unix.socket";

/// Absolute roots of one daemon installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    /// State directory (database, storage pools, instance links).
    pub daemon: PathBuf,
    /// Log directory.
    pub logs: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
}

impl DaemonPaths {
    /// Path of the REST socket.
    #[must_use]
    pub fn socket(&self) -> PathBuf {
        self.daemon.join(SOCKET_NAME)
    }

    /// Path of the database directory.
    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.daemon.join("database")
    }
}

/// A daemon installation the migration can drive.
#[async_trait]
pub trait Daemon: Send + Sync + fmt::Debug {
    /// Short label of the packaging (`snap`, `systemd`, `openrc`).
    fn name(&self) -> &'static str;

    /// Whether this installation exists on the host. Pure filesystem probe.
    fn present(&self) -> bool;

    /// Resolve the installation's directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the state directory cannot be determined.
    fn paths(&self) -> AppResult<DaemonPaths>;

    /// Open a client for the daemon and check that it answers.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon is unreachable.
    async fn connect(&self) -> AppResult<Arc<dyn DaemonClient>>;

    /// Stop the daemon and its socket activation.
    ///
    /// # Errors
    ///
    /// Returns an error when the service manager command fails.
    fn stop(&self, host: &dyn HostOps) -> AppResult<()>;

    /// Start the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error when the service manager command fails.
    fn start(&self, host: &dyn HostOps) -> AppResult<()>;
}

/// A source installation, which can additionally be uninstalled.
pub trait SourceDaemon: Daemon {
    /// Remove the source package and its data.
    ///
    /// # Errors
    ///
    /// Returns an error when the package manager command fails.
    fn purge(&self, host: &dyn HostOps) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    daemon: &'static str,
    logs: &'static str,
    cache: &'static str,
}

const LXD_SNAP: Layout = Layout {
    daemon: "var/snap/lxd/common/lxd",
    logs: "var/snap/lxd/common/lxd/logs",
    cache: "var/snap/lxd/common/lxd/cache",
};

const LXD_DEB: Layout = Layout {
    daemon: "var/lib/lxd",
    logs: "var/log/lxd",
    cache: "var/cache/lxd",
};

const INCUS: Layout = Layout {
    daemon: "var/lib/incus",
    logs: "var/log/incus",
    cache: "var/cache/incus",
};

/// A packaged daemon installation rooted at a filesystem prefix.
#[derive(Debug, Clone)]
pub struct ServiceCandidate {
    name: &'static str,
    root: PathBuf,
    /// Every group must have at least one existing path.
    probes: &'static [&'static [&'static str]],
    layout: Layout,
    state_required: bool,
    stop: &'static [&'static str],
    start: &'static [&'static str],
    /// Empty for targets.
    purge: &'static [&'static str],
}

impl ServiceCandidate {
    /// LXD installed from the snap store.
    #[must_use]
    pub fn lxd_snap(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "snap",
            root: root.into(),
            probes: &[&["snap/bin/lxd"]],
            layout: LXD_SNAP,
            state_required: true,
            stop: &["snap", "stop", "lxd"],
            start: &["snap", "start", "lxd"],
            purge: &["snap", "remove", "lxd", "--purge"],
        }
    }

    /// LXD installed from distribution packages and managed by systemd.
    #[must_use]
    pub fn lxd_systemd(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "systemd",
            root: root.into(),
            probes: &[&["usr/bin/lxd", "usr/sbin/lxd"], &["var/lib/lxd"]],
            layout: LXD_DEB,
            state_required: true,
            stop: &[
                "systemctl",
                "stop",
                "lxd-containers.service",
                "lxd.service",
                "lxd.socket",
            ],
            start: &["systemctl", "start", "lxd.socket", "lxd.service"],
            purge: &["apt-get", "remove", "--yes", "--purge", "lxd", "lxd-client"],
        }
    }

    /// Incus managed by systemd.
    #[must_use]
    pub fn incus_systemd(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "systemd",
            root: root.into(),
            probes: &[&[
                "lib/systemd/system/incus.service",
                "usr/lib/systemd/system/incus.service",
                "etc/systemd/system/incus.service",
            ]],
            layout: INCUS,
            state_required: false,
            stop: &["systemctl", "stop", "incus.service", "incus.socket"],
            start: &["systemctl", "start", "incus.socket", "incus.service"],
            purge: &[],
        }
    }

    /// Incus managed by OpenRC.
    #[must_use]
    pub fn incus_openrc(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "openrc",
            root: root.into(),
            probes: &[&["etc/init.d/incus"]],
            layout: INCUS,
            state_required: false,
            stop: &["rc-service", "incus", "stop"],
            start: &["rc-service", "incus", "start"],
            purge: &[],
        }
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn run(&self, host: &dyn HostOps, operation: &'static str, command: &[&str]) -> AppResult<()> {
        if command.is_empty() {
            return Ok(());
        }
        host.run(&argv(command))
            .map(|_| ())
            .map_err(|err| AppError::fsops(operation, err))?;
        info!(candidate = self.name, operation, "service command completed");
        Ok(())
    }
}

#[async_trait]
impl Daemon for ServiceCandidate {
    fn name(&self) -> &'static str {
        self.name
    }

    fn present(&self) -> bool {
        self.probes.iter().all(|group| {
            group.iter().any(|relative| self.resolve(relative).exists())
        })
    }

    fn paths(&self) -> AppResult<DaemonPaths> {
        let daemon = self.resolve(self.layout.daemon);
        if self.state_required && !daemon.is_dir() {
            return Err(AppError::Io {
                operation: "daemon_paths",
                path: Some(daemon),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Ok(DaemonPaths {
            daemon,
            logs: self.resolve(self.layout.logs),
            cache: self.resolve(self.layout.cache),
        })
    }

    async fn connect(&self) -> AppResult<Arc<dyn DaemonClient>> {
        let socket = self.resolve(self.layout.daemon).join(SOCKET_NAME);
        let client = UnixDaemonClient::new(socket);
        client
            .server_info(None)
            .await
            .map_err(|err| AppError::client("connect", err))?;
        Ok(Arc::new(client))
    }

    fn stop(&self, host: &dyn HostOps) -> AppResult<()> {
        self.run(host, "stop", self.stop)
    }

    fn start(&self, host: &dyn HostOps) -> AppResult<()> {
        self.run(host, "start", self.start)
    }
}

impl SourceDaemon for ServiceCandidate {
    fn purge(&self, host: &dyn HostOps) -> AppResult<()> {
        self.run(host, "purge", self.purge)
    }
}

/// Supported source installations in priority order.
#[must_use]
pub fn source_candidates(root: &Path) -> Vec<Arc<dyn SourceDaemon>> {
    vec![
        Arc::new(ServiceCandidate::lxd_snap(root)),
        Arc::new(ServiceCandidate::lxd_systemd(root)),
    ]
}

/// Supported target installations in priority order.
#[must_use]
pub fn target_candidates(root: &Path) -> Vec<Arc<dyn Daemon>> {
    vec![
        Arc::new(ServiceCandidate::incus_systemd(root)),
        Arc::new(ServiceCandidate::incus_openrc(root)),
    ]
}

/// First present candidate, if any.
#[must_use]
pub fn discover<T: Daemon + ?Sized>(candidates: &[Arc<T>]) -> Option<Arc<T>> {
    candidates
        .iter()
        .find(|candidate| candidate.present())
        .cloned()
}
