//! Host-side effects of the migration: commands, mounts and filesystem moves.
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
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod error;
pub mod host;
pub mod ops;

pub use error::{FsOpsError, FsOpsResult};
pub use host::{HostOps, SystemHost, argv, parse_mount_points};
pub use ops::{
    MoveOutcome, PRIVATE_FILE_MODE, STATE_DIR_MODE, detach_all, move_dir, rebase, relocate_state,
    remove_obsolete, repair_symlinks, wipe_dirs, write_private_file,
};
