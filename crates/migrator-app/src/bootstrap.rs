//! Production wiring: settings, logging and the runtime driving one migration.

use std::path::PathBuf;
use std::sync::Arc;

use migrator_config::{Flags, LogOutput, MigrationSettings};
use migrator_fsops::SystemHost;
use migrator_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, init_logging, record_mode};
use tracing::info;

use crate::daemons::{source_candidates, target_candidates};
use crate::database::SqliteDatabaseMigrator;
use crate::error::{AppError, AppResult};
use crate::orchestrator::{Migration, MigrationDeps};
use crate::prompt::StdinPrompter;

const HOST_ROOT: &str = "/";

/// Production collaborators rooted at the real filesystem.
#[must_use]
pub fn system_deps() -> MigrationDeps {
    let root = PathBuf::from(HOST_ROOT);
    MigrationDeps {
        sources: source_candidates(&root),
        targets: target_candidates(&root),
        host: Arc::new(SystemHost),
        prompter: Arc::new(StdinPrompter),
        database: Arc::new(SqliteDatabaseMigrator),
        root,
    }
}

const fn log_format(output: Option<LogOutput>) -> LogFormat {
    match output {
        Some(LogOutput::Json) => LogFormat::Json,
        Some(LogOutput::Pretty) => LogFormat::Pretty,
        None => LogFormat::infer(),
    }
}

/// Entry point for the `lxd-to-incus` binary.
///
/// Resolves settings, installs logging and drives one [`Migration`] on a
/// single-threaded runtime.
///
/// # Errors
///
/// Returns an error if settings or logging cannot be initialised, or if any
/// migration phase fails.
pub fn run_app(flags: Flags) -> AppResult<()> {
    let settings = MigrationSettings::from_env(flags)
        .map_err(|err| AppError::config("settings.from_env", err))?;
    let logging = LoggingConfig {
        format: log_format(settings.log_output),
        ..LoggingConfig::default()
    };
    init_logging(&logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let context = GlobalContextGuard::new("bootstrap");
    record_mode(if settings.is_cluster_member() {
        "cluster-member"
    } else {
        "primary"
    });
    info!(
        trace_id = %context.trace_id(),
        assume_yes = settings.flags.assume_yes,
        cluster_member = settings.flags.cluster_member,
        "lxd-to-incus starting"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| AppError::Io {
            operation: "runtime.build",
            path: None,
            source,
        })?;
    let mut migration = Migration::new(system_deps(), settings);
    runtime.block_on(migration.run())
}
