//! CLI error type and exit-code mapping.

use std::fmt::{self, Display, Formatter};

/// CLI-level error type separating refused invocations from failed runs.
#[derive(Debug)]
pub(crate) enum CliError {
    Precondition(String),
    Failure(anyhow::Error),
}

/// Convenience alias for functions returning a `CliError`.
pub(crate) type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    pub(crate) fn failure(error: impl Into<anyhow::Error>) -> Self {
        Self::Failure(error.into())
    }

    /// Every failure, declined confirmations included, exits with 1.
    pub(crate) const fn exit_code(&self) -> i32 {
        match self {
            Self::Precondition(_) | Self::Failure(_) => 1,
        }
    }

    pub(crate) fn display_message(&self) -> String {
        match self {
            Self::Precondition(message) => message.clone(),
            Self::Failure(error) => format!("{error:#}"),
        }
    }
}

impl Display for CliError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("cli error")
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn failure_message_includes_the_chain() {
        let err = CliError::failure(anyhow!("mv exited with 1").context("move failed"));
        assert_eq!(err.display_message(), "move failed: mv exited with 1");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn precondition_message_is_verbatim() {
        let err = CliError::precondition("This tool must be run as root");
        assert_eq!(err.display_message(), "This tool must be run as root");
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.to_string(), "cli error");
    }
}
