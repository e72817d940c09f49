use std::fs;
use std::os::unix::fs::symlink;

use anyhow::Result;
use migrator_fsops::{
    MoveOutcome, move_dir, relocate_state, remove_obsolete, repair_symlinks, wipe_dirs,
};
use migrator_test_support::fixtures::temp_dir;
use migrator_test_support::{HostEvent, RecordingHost};

#[test]
fn full_tree_move_rewrites_links_and_prunes_runtime_dirs() -> Result<()> {
    let temp = temp_dir()?;
    let source = temp.path().join("var/snap/lxd/common/lxd");
    let target = temp.path().join("var/lib/incus");
    fs::create_dir_all(source.join("containers"))?;
    fs::create_dir_all(source.join("storage-pools/default/containers/c1"))?;
    fs::create_dir_all(source.join("devices/c1"))?;
    symlink(
        source.join("storage-pools/default/containers/c1"),
        source.join("containers/c1"),
    )?;
    fs::create_dir_all(target.join("stale"))?;

    let host = RecordingHost::new();
    wipe_dirs(&[&target])?;
    assert_eq!(relocate_state(&host, &source, &target)?, MoveOutcome::Moved);
    remove_obsolete(&target, &["backups", "images"], &["devices", "devlxd"])?;
    let repaired = repair_symlinks(&target, &["containers"], &source, &target)?;

    assert_eq!(repaired, 1);
    assert!(!target.join("stale").exists());
    assert!(!target.join("devices").exists());
    assert_eq!(
        fs::read_link(target.join("containers/c1"))?,
        target.join("storage-pools/default/containers/c1")
    );
    assert_eq!(
        host.commands(),
        vec![format!("mv {} {}", source.display(), target.display())]
    );
    Ok(())
}

#[test]
fn mounted_state_is_bound_then_detached() -> Result<()> {
    let temp = temp_dir()?;
    let source = temp.path().join("lxd");
    let target = temp.path().join("incus");
    fs::create_dir_all(&source)?;

    let host = RecordingHost::new().with_mount_point(&source);
    assert_eq!(
        relocate_state(&host, &source, &target)?,
        MoveOutcome::BindMounted
    );
    assert_eq!(
        host.events(),
        vec![
            HostEvent::BindMount {
                source: source.clone(),
                target: target.clone(),
            },
            HostEvent::Detach(source.clone()),
        ]
    );
    assert!(host.commands().is_empty());
    Ok(())
}

#[test]
fn failing_move_surfaces_command_error() -> Result<()> {
    let temp = temp_dir()?;
    let source = temp.path().join("logs");
    fs::create_dir_all(&source)?;
    let host = RecordingHost::new().failing("mv");

    let err = move_dir(&host, &source, &temp.path().join("incus-logs"))
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected mv failure"))?;
    assert!(err.to_string().contains("scripted failure"));
    Ok(())
}
