//! Database step run against the moved target database directory.
//!
//! Incus reads the LXD database files as they are, so the default step only
//! confirms the moved files are intact before the target is started on them.

use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Database files checked by [`SqliteDatabaseMigrator`], relative to the database directory.
pub const DATABASE_FILES: &[&str] = &["local.db", "global/db.bin"];

/// A database file that passed its checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckedDatabase {
    /// Database file.
    pub path: PathBuf,
    /// Highest applied schema version.
    pub schema_version: i64,
}

/// Opaque database-format step.
pub trait DatabaseMigrator: Send + Sync + fmt::Debug {
    /// Prepare the database directory `dir` for the target daemon.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be used by the target.
    fn migrate(&self, dir: &Path) -> AppResult<Vec<CheckedDatabase>>;
}

/// Read-only consistency check of the moved database files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDatabaseMigrator;

impl SqliteDatabaseMigrator {
    fn check(path: &Path) -> AppResult<CheckedDatabase> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| AppError::database("open", path, err))?;

        let integrity: String = connection
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))
            .map_err(|err| AppError::database("integrity_check", path, err))?;
        if integrity != "ok" {
            return Err(AppError::DatabaseCheck {
                path: path.to_path_buf(),
                reason: integrity,
            });
        }

        let has_schema: bool = connection
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'schema'",
                [],
                |row| row.get(0),
            )
            .map_err(|err| AppError::database("schema_lookup", path, err))?;
        if !has_schema {
            return Err(AppError::DatabaseCheck {
                path: path.to_path_buf(),
                reason: "schema table is missing".to_string(),
            });
        }

        let schema_version: i64 = connection
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema", [], |row| {
                row.get(0)
            })
            .map_err(|err| AppError::database("schema_version", path, err))?;
        Ok(CheckedDatabase {
            path: path.to_path_buf(),
            schema_version,
        })
    }
}

impl DatabaseMigrator for SqliteDatabaseMigrator {
    fn migrate(&self, dir: &Path) -> AppResult<Vec<CheckedDatabase>> {
        if !dir.is_dir() {
            return Err(AppError::DatabaseCheck {
                path: dir.to_path_buf(),
                reason: "database directory is missing".to_string(),
            });
        }
        let mut checked = Vec::new();
        for relative in DATABASE_FILES {
            let path = dir.join(relative);
            if !path.is_file() {
                continue;
            }
            let database = Self::check(&path)?;
            info!(
                path = %database.path.display(),
                schema_version = database.schema_version,
                "database checked"
            );
            checked.push(database);
        }
        Ok(checked)
    }
}
