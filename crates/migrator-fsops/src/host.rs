//! Host capabilities: external commands, bind mounts and mount-point detection.
//!
//! Everything that leaves the process goes through [`HostOps`] so the
//! orchestrator can be exercised against a recording fake.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tracing::debug;

use crate::error::{FsOpsError, FsOpsResult};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// Side effects the migration needs from the host.
pub trait HostOps: Send + Sync {
    /// Run a command and return its standard output; non-zero exit is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or exits unsuccessfully.
    fn run(&self, argv: &[String]) -> FsOpsResult<String>;

    /// Whether `path` is the mount point of a mounted filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn is_mount_point(&self, path: &Path) -> FsOpsResult<bool>;

    /// Recursively bind-mount `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount syscall fails.
    fn bind_mount(&self, source: &Path, target: &Path) -> FsOpsResult<()>;

    /// Lazily detach the filesystem mounted at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount syscall fails.
    fn detach(&self, path: &Path) -> FsOpsResult<()>;
}

/// Build an argv vector from string slices.
#[must_use]
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_string()).collect()
}

/// [`HostOps`] backed by the running system.
#[derive(Debug, Clone, Default)]
pub struct SystemHost;

impl HostOps for SystemHost {
    fn run(&self, argv: &[String]) -> FsOpsResult<String> {
        let Some((program, args)) = argv.split_first() else {
            return Err(FsOpsError::InvalidInput {
                field: "argv",
                reason: "command must not be empty",
                value: None,
            });
        };
        debug!(command = %argv.join(" "), "running host command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| FsOpsError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(FsOpsError::command(
                argv,
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn is_mount_point(&self, path: &Path) -> FsOpsResult<bool> {
        let resolved = match fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(FsOpsError::io("canonicalize", path, err)),
        };
        let table = fs::read_to_string(MOUNTINFO)
            .map_err(|err| FsOpsError::io("read_mountinfo", MOUNTINFO, err))?;
        Ok(parse_mount_points(&table).contains(&resolved))
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> FsOpsResult<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|err| FsOpsError::nix("bind_mount", target, err))
    }

    fn detach(&self, path: &Path) -> FsOpsResult<()> {
        umount2(path, MntFlags::MNT_DETACH).map_err(|err| FsOpsError::nix("detach", path, err))
    }
}

/// Extract mount points from `/proc/self/mountinfo` content.
#[must_use]
pub fn parse_mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Undo the `\ooo` escaping the kernel applies to spaces, tabs and backslashes.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'\\'
            && let Some(value) = bytes.get(index + 1..index + 4).and_then(octal_byte)
        {
            out.push(value);
            index += 4;
            continue;
        }
        out.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, digit| match digit {
        b'0'..=b'7' => acc.checked_mul(8)?.checked_add(digit - b'0'),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
41 22 0:40 / /var/snap/lxd/common/lxd rw,relatime shared:20 - zfs tank/lxd rw
42 22 0:41 / /mnt/with\\040space rw - tmpfs tmpfs rw
";

    #[test]
    fn mount_points_are_parsed_and_unescaped() {
        let points = parse_mount_points(TABLE);
        assert_eq!(
            points,
            vec![
                PathBuf::from("/"),
                PathBuf::from("/var/snap/lxd/common/lxd"),
                PathBuf::from("/mnt/with space"),
            ]
        );
    }

    #[test]
    fn unescape_leaves_plain_backslashes() {
        assert_eq!(unescape_octal("a\\b"), "a\\b");
        assert_eq!(unescape_octal("tab\\011x"), "tab\tx");
    }

    #[test]
    fn system_host_runs_commands() -> FsOpsResult<()> {
        let host = SystemHost;
        let output = host.run(&argv(&["sh", "-c", "printf ok"]))?;
        assert_eq!(output, "ok");

        let err = host.run(&argv(&["sh", "-c", "echo boom >&2; exit 3"]));
        assert!(matches!(
            err,
            Err(FsOpsError::Command {
                status: Some(3),
                ref stderr,
                ..
            }) if stderr == "boom"
        ));
        assert!(matches!(host.run(&[]), Err(FsOpsError::InvalidInput { .. })));
        Ok(())
    }

    #[test]
    fn missing_path_is_not_a_mount_point() -> FsOpsResult<()> {
        assert!(!SystemHost.is_mount_point(Path::new("/nonexistent/migrator/state"))?);
        Ok(())
    }
}
