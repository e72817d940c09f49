//! Error types for settings resolution.

use thiserror::Error;

/// Primary error type for settings resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable contained an invalid value.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value.
        value: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str, value: &str) -> Self {
        Self::InvalidValue {
            name,
            reason,
            value: value.to_string(),
        }
    }
}

/// Convenience alias for settings results.
pub type ConfigResult<T> = Result<T, ConfigError>;
