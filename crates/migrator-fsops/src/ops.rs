//! Filesystem mutations applied while both daemons are stopped.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{FsOpsError, FsOpsResult};
use crate::host::HostOps;

/// Permissions applied to a freshly created target state directory.
pub const STATE_DIR_MODE: u32 = 0o711;
/// Permissions applied to generated database patches.
pub const PRIVATE_FILE_MODE: u32 = 0o600;

/// What happened to a directory handed to [`move_dir`] or [`relocate_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Renamed into place with `mv`.
    Moved,
    /// The source did not exist; nothing was done.
    Missing,
    /// The source was a mount point and was bind-mounted onto the target.
    BindMounted,
}

/// Replace the `from` prefix of `path` with `to`, comparing whole components.
///
/// Returns `None` when `path` is not rooted under `from`.
#[must_use]
pub fn rebase(path: &Path, from: &Path, to: &Path) -> Option<PathBuf> {
    path.strip_prefix(from).ok().map(|rest| {
        if rest.as_os_str().is_empty() {
            to.to_path_buf()
        } else {
            to.join(rest)
        }
    })
}

/// Remove directories recursively; missing ones are ignored.
///
/// # Errors
///
/// Returns an error if an existing directory cannot be removed.
pub fn wipe_dirs(paths: &[&Path]) -> FsOpsResult<()> {
    for path in paths {
        match fs::remove_dir_all(path) {
            Ok(()) => debug!(path = %path.display(), "removed directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(FsOpsError::io("wipe", *path, err)),
        }
    }
    Ok(())
}

/// Rename `from` to `to` through `mv`, so cross-filesystem moves work.
///
/// # Errors
///
/// Returns an error if the parent of `to` cannot be created or `mv` fails.
pub fn move_dir(host: &dyn HostOps, from: &Path, to: &Path) -> FsOpsResult<MoveOutcome> {
    if fs::symlink_metadata(from).is_err() {
        return Ok(MoveOutcome::Missing);
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|err| FsOpsError::io("create_parent", parent, err))?;
    }
    host.run(&[
        "mv".to_string(),
        from.display().to_string(),
        to.display().to_string(),
    ])?;
    info!(from = %from.display(), to = %to.display(), "moved directory");
    Ok(MoveOutcome::Moved)
}

/// Move the daemon state directory, bind-mounting it instead when it is a mount point.
///
/// A mounted source cannot be renamed, so the target directory is created with
/// [`STATE_DIR_MODE`], the source is bind-mounted onto it and then detached.
///
/// # Errors
///
/// Returns an error if mount detection, directory creation, mounting or the move fails.
pub fn relocate_state(host: &dyn HostOps, from: &Path, to: &Path) -> FsOpsResult<MoveOutcome> {
    if !host.is_mount_point(from)? {
        return move_dir(host, from, to);
    }
    fs::create_dir_all(to).map_err(|err| FsOpsError::io("create_state_dir", to, err))?;
    fs::set_permissions(to, fs::Permissions::from_mode(STATE_DIR_MODE))
        .map_err(|err| FsOpsError::io("chmod_state_dir", to, err))?;
    host.bind_mount(from, to)?;
    host.detach(from)?;
    info!(from = %from.display(), to = %to.display(), "bind-mounted state directory");
    Ok(MoveOutcome::BindMounted)
}

/// Write `contents` to `path`, readable by the owner only.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub fn write_private_file(path: &Path, contents: &str) -> FsOpsResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_FILE_MODE)
        .open(path)
        .map_err(|err| FsOpsError::io("create_private_file", path, err))?;
    file.write_all(contents.as_bytes())
        .map_err(|err| FsOpsError::io("write_private_file", path, err))?;
    fs::set_permissions(path, fs::Permissions::from_mode(PRIVATE_FILE_MODE))
        .map_err(|err| FsOpsError::io("chmod_private_file", path, err))
}

/// Remove entries of `root` the target daemon recreates on start.
///
/// Entries in `symlinks` are removed only when they are symlinks; entries in
/// `dirs` are removed recursively. Returns the removed paths.
///
/// # Errors
///
/// Returns an error if an existing entry cannot be removed.
pub fn remove_obsolete(
    root: &Path,
    symlinks: &[&str],
    dirs: &[&str],
) -> FsOpsResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for name in symlinks {
        let path = root.join(name);
        let is_link =
            fs::symlink_metadata(&path).is_ok_and(|meta| meta.file_type().is_symlink());
        if is_link {
            fs::remove_file(&path).map_err(|err| FsOpsError::io("remove_symlink", &path, err))?;
            removed.push(path);
        }
    }
    for name in dirs {
        let path = root.join(name);
        match fs::remove_dir_all(&path) {
            Ok(()) => removed.push(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(FsOpsError::io("remove_dir", &path, err)),
        }
    }
    Ok(removed)
}

/// Point symlinks directly under `root/<dir>` that target `from` at `to` instead.
///
/// Links already pointing elsewhere are left alone, so running this twice is a
/// no-op the second time. Returns the number of rewritten links.
///
/// # Errors
///
/// Returns an error if a directory cannot be traversed or a link cannot be replaced.
pub fn repair_symlinks(root: &Path, dirs: &[&str], from: &Path, to: &Path) -> FsOpsResult<usize> {
    let mut repaired = 0usize;
    for name in dirs {
        let dir = root.join(name);
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| FsOpsError::walkdir("repair_symlinks", &dir, err))?;
            if !entry.path_is_symlink() {
                continue;
            }
            let path = entry.path();
            let current =
                fs::read_link(path).map_err(|err| FsOpsError::io("read_link", path, err))?;
            let Some(updated) = rebase(&current, from, to) else {
                continue;
            };
            if updated == current {
                continue;
            }
            fs::remove_file(path).map_err(|err| FsOpsError::io("remove_link", path, err))?;
            symlink(&updated, path).map_err(|err| FsOpsError::io("create_link", path, err))?;
            debug!(link = %path.display(), target = %updated.display(), "repaired symlink");
            repaired += 1;
        }
    }
    Ok(repaired)
}

/// Lazily detach every mount point in `paths`, ignoring failures.
///
/// Returns the paths that were detached.
#[must_use]
pub fn detach_all(host: &dyn HostOps, paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .filter(|path| match host.detach(path) {
            Ok(()) => true,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "detach skipped");
                false
            }
        })
        .cloned()
        .collect()
}
