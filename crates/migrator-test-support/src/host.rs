//! Recording [`HostOps`] fake.
//!
//! Commands are recorded in order and answered from a scripted table keyed by
//! the space-joined command line. `mv` is emulated with a real rename so
//! filesystem assertions keep working; mounts are recorded only.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use migrator_fsops::{FsOpsError, FsOpsResult, HostOps};

/// Host event observed by [`RecordingHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// An external command.
    Command(Vec<String>),
    /// A recursive bind mount.
    BindMount {
        /// Mounted directory.
        source: PathBuf,
        /// Mount target.
        target: PathBuf,
    },
    /// A lazy unmount.
    Detach(PathBuf),
}

#[derive(Debug, Default)]
struct Script {
    outputs: BTreeMap<String, String>,
    failures: BTreeSet<String>,
    mount_points: BTreeSet<PathBuf>,
    detach_failures: BTreeSet<PathBuf>,
    events: Vec<HostEvent>,
}

/// Thread-safe recording host.
#[derive(Debug, Default)]
pub struct RecordingHost {
    script: Mutex<Script>,
}

impl RecordingHost {
    /// Empty script: every command succeeds with no output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `command` (space-joined argv) with `stdout`.
    #[must_use]
    pub fn with_output(self, command: &str, stdout: &str) -> Self {
        self.script()
            .outputs
            .insert(command.to_string(), stdout.to_string());
        self
    }

    /// Fail every command whose command line starts with `prefix`.
    #[must_use]
    pub fn failing(self, prefix: &str) -> Self {
        self.script().failures.insert(prefix.to_string());
        self
    }

    /// Report `path` as a mount point.
    #[must_use]
    pub fn with_mount_point(self, path: impl Into<PathBuf>) -> Self {
        self.script().mount_points.insert(path.into());
        self
    }

    /// Make detaching `path` fail.
    #[must_use]
    pub fn failing_detach(self, path: impl Into<PathBuf>) -> Self {
        self.script().detach_failures.insert(path.into());
        self
    }

    /// Every event observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<HostEvent> {
        self.script().events.clone()
    }

    /// Command lines observed so far, space-joined.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.script()
            .events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Command(argv) => Some(argv.join(" ")),
                _ => None,
            })
            .collect()
    }
}

impl HostOps for RecordingHost {
    fn run(&self, argv: &[String]) -> FsOpsResult<String> {
        let line = argv.join(" ");
        let mut script = self.script();
        script.events.push(HostEvent::Command(argv.to_vec()));
        if script
            .failures
            .iter()
            .any(|prefix| line.starts_with(prefix))
        {
            return Err(FsOpsError::command(argv, Some(1), "scripted failure"));
        }
        if let [program, from, to] = argv
            && program == "mv"
        {
            fs::rename(from, to)
                .map_err(|err| FsOpsError::command(argv, Some(1), &err.to_string()))?;
        }
        Ok(script.outputs.get(&line).cloned().unwrap_or_default())
    }

    fn is_mount_point(&self, path: &Path) -> FsOpsResult<bool> {
        Ok(self.script().mount_points.contains(path))
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> FsOpsResult<()> {
        self.script().events.push(HostEvent::BindMount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
        });
        Ok(())
    }

    fn detach(&self, path: &Path) -> FsOpsResult<()> {
        let mut script = self.script();
        if script.detach_failures.contains(path) {
            return Err(FsOpsError::command(
                &["umount".to_string(), path.display().to_string()],
                Some(32),
                "not mounted",
            ));
        }
        script.events.push(HostEvent::Detach(path.to_path_buf()));
        Ok(())
    }
}
