//! # Design
//!
//! - Centralize migration errors for bootstrap, planning and execution.
//! - Carry the failing operation plus paths or names so operators can act on the message.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// A condition required before starting was not met.
    #[error("{reason}")]
    Precondition {
        /// Operator-facing explanation.
        reason: &'static str,
        /// Optional offending value.
        value: Option<String>,
    },
    /// The operator answered "no" to a confirmation.
    #[error("declined: {prompt}")]
    Declined {
        /// Question that was declined.
        prompt: &'static str,
    },
    /// Daemon REST operations failed.
    #[error("daemon request failed during {operation}")]
    Client {
        /// Operation identifier.
        operation: &'static str,
        /// Source client error.
        source: migrator_client::ClientError,
    },
    /// Pre-flight validation found problems.
    #[error("pre-flight validation failed: {}", .violations.join("; "))]
    Validation {
        /// Every violation found.
        violations: Vec<String>,
    },
    /// Host commands or filesystem mutations failed.
    #[error("host operation failed during {operation}")]
    FsOps {
        /// Operation identifier.
        operation: &'static str,
        /// Source fsops error.
        source: migrator_fsops::FsOpsError,
    },
    /// Settings could not be resolved.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: migrator_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: migrator_telemetry::TelemetryError,
    },
    /// Database access failed.
    #[error("database operation {operation} failed on {}", path.display())]
    Database {
        /// Operation identifier.
        operation: &'static str,
        /// Database file.
        path: PathBuf,
        /// Source sqlite error.
        source: rusqlite::Error,
    },
    /// A database failed its consistency checks.
    #[error("database {} is not usable: {reason}", path.display())]
    DatabaseCheck {
        /// Database file or directory.
        path: PathBuf,
        /// Reason reported by the check.
        reason: String,
    },
    /// Query tool output could not be parsed.
    #[error("unexpected output from {operation}")]
    Payload {
        /// Operation identifier.
        operation: &'static str,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// IO operations failed.
    #[error("io operation {operation} failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// The cluster did not converge within the configured bound.
    #[error("cluster did not converge after {attempts} attempts")]
    ConvergenceExhausted {
        /// Polls performed.
        attempts: u32,
    },
}

impl AppError {
    pub(crate) const fn precondition(reason: &'static str) -> Self {
        Self::Precondition {
            reason,
            value: None,
        }
    }

    pub(crate) const fn client(
        operation: &'static str,
        source: migrator_client::ClientError,
    ) -> Self {
        Self::Client { operation, source }
    }

    pub(crate) const fn fsops(operation: &'static str, source: migrator_fsops::FsOpsError) -> Self {
        Self::FsOps { operation, source }
    }

    pub(crate) const fn config(
        operation: &'static str,
        source: migrator_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: migrator_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) fn database(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: rusqlite::Error,
    ) -> Self {
        Self::Database {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) const fn payload(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Payload { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn app_error_helpers_build_variants() -> Result<(), Box<dyn Error>> {
        let Err(json_error) = serde_json::from_str::<serde_json::Value>("invalid") else {
            return Err(io::Error::other("expected invalid json").into());
        };
        let payload = AppError::payload("ovn-nbctl list", json_error);
        assert!(payload.source().is_some());

        let fsops = AppError::fsops(
            "move",
            migrator_fsops::FsOpsError::command(&["mv".to_string()], Some(1), "boom"),
        );
        assert!(matches!(fsops, AppError::FsOps { .. }));

        let config = AppError::config(
            "settings",
            migrator_config::ConfigError::InvalidValue {
                name: "LXD_TO_INCUS_POLL_INTERVAL_SECS",
                reason: "must be positive",
                value: "0".to_string(),
            },
        );
        assert!(config.source().is_some());

        let validation = AppError::Validation {
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(validation.to_string(), "pre-flight validation failed: a; b");

        let database = AppError::database(
            "open",
            "/var/lib/incus/database/local.db",
            rusqlite::Error::InvalidQuery,
        );
        assert!(database.to_string().contains("local.db"));
        assert_eq!(
            AppError::precondition("This tool must be run as root").to_string(),
            "This tool must be run as root"
        );
        Ok(())
    }
}
