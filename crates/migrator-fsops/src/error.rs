//! # Design
//!
//! - Provide structured errors for host-side effects of the migration.
//! - Capture operation context (paths, argv) so failures point at the exact step.
//! - Preserve source errors for the error chain.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for host operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Errors produced by host operations.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure during {operation} on {}", path.display())]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Walkdir traversal failures.
    #[error("fsops walkdir failure during {operation} on {}", path.display())]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Mount syscall failures.
    #[error("fsops mount failure during {operation} on {}", path.display())]
    Nix {
        /// Operation that triggered the syscall failure.
        operation: &'static str,
        /// Path involved in the syscall failure.
        path: PathBuf,
        /// Underlying nix error.
        source: nix::Error,
    },
    /// An external command could not be spawned.
    #[error("failed to spawn {program}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed ({}): {stderr}", status.map_or_else(|| "signal".to_string(), |code| format!("exit {code}")))]
    Command {
        /// Full command line.
        command: String,
        /// Exit code, `None` when terminated by a signal.
        status: Option<i32>,
        /// Trimmed standard error output.
        stderr: String,
    },
    /// Input validation failures.
    #[error("fsops invalid input for {field}: {reason}")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn nix(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: nix::Error,
    ) -> Self {
        Self::Nix {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Build a command failure from an argv vector.
    #[must_use]
    pub fn command(argv: &[String], status: Option<i32>, stderr: &str) -> Self {
        Self::Command {
            command: argv.join(" "),
            status,
            stderr: stderr.trim().to_string(),
        }
    }
}
