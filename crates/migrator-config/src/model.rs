//! Typed settings resolved from command-line flags and the environment.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    CONVERGENCE_INTERVAL, CONVERGENCE_WARMUP, ENABLED, ENV_CLUSTER_NO_EVACUATE,
    ENV_CLUSTER_NO_EVACUATE_LEGACY, ENV_CLUSTER_NO_STOP, ENV_LOG_FORMAT, ENV_POLL_INTERVAL_SECS,
};
use crate::error::{ConfigError, ConfigResult};

/// Command-line switches accepted by `lxd-to-incus`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    /// Answer every confirmation with "yes".
    pub assume_yes: bool,
    /// Run as a secondary invocation on a non-primary cluster member.
    pub cluster_member: bool,
}

/// Poll schedule for the cluster convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first poll.
    pub warmup: Duration,
    /// Delay between polls.
    pub interval: Duration,
    /// Upper bound on polls; `None` waits forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            warmup: CONVERGENCE_WARMUP,
            interval: CONVERGENCE_INTERVAL,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Fixed schedule using the same delay for warm-up and polling.
    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        Self {
            warmup: interval,
            interval,
            max_attempts: None,
        }
    }

    /// Bound the number of polls.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Whether another poll is allowed after `attempts` failed ones.
    #[must_use]
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }
}

/// Requested log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogOutput {
    fn parse(value: &str) -> ConfigResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(ConfigError::invalid(
                ENV_LOG_FORMAT,
                "expected json or pretty",
                value,
            )),
        }
    }
}

/// Everything the migration needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    /// Command-line switches.
    pub flags: Flags,
    /// Omit the workload-stop announcement from the confirmation prompt.
    pub cluster_no_stop: bool,
    /// Skip cluster evacuation.
    pub cluster_no_evacuate: bool,
    /// Convergence poll schedule.
    pub retry: RetryPolicy,
    /// Log format override; `None` lets telemetry infer one.
    pub log_output: Option<LogOutput>,
}

impl MigrationSettings {
    /// Settings with defaults for everything but the flags.
    #[must_use]
    pub fn new(flags: Flags) -> Self {
        Self {
            flags,
            cluster_no_stop: false,
            cluster_no_evacuate: false,
            retry: RetryPolicy::default(),
            log_output: None,
        }
    }

    /// Resolve settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable cannot be parsed.
    pub fn from_env(flags: Flags) -> ConfigResult<Self> {
        Self::from_lookup(flags, |name| env::var(name).ok())
    }

    /// Resolve settings using an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable cannot be parsed.
    pub fn from_lookup<F>(flags: Flags, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = |name: &str| lookup(name).is_some_and(|value| value == ENABLED);

        let mut settings = Self::new(flags);
        settings.cluster_no_stop = enabled(ENV_CLUSTER_NO_STOP);
        settings.cluster_no_evacuate =
            enabled(ENV_CLUSTER_NO_EVACUATE) || enabled(ENV_CLUSTER_NO_EVACUATE_LEGACY);

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_SECS) {
            settings.retry = RetryPolicy::every(parse_interval(&raw)?);
        }
        if let Some(raw) = lookup(ENV_LOG_FORMAT).filter(|value| !value.trim().is_empty()) {
            settings.log_output = Some(LogOutput::parse(&raw)?);
        }
        Ok(settings)
    }

    /// Whether this run is the secondary invocation on a cluster member.
    #[must_use]
    pub const fn is_cluster_member(&self) -> bool {
        self.flags.cluster_member
    }
}

fn parse_interval(raw: &str) -> ConfigResult<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(ENV_POLL_INTERVAL_SECS, "expected whole seconds", raw))?;
    if secs == 0 {
        return Err(ConfigError::invalid(
            ENV_POLL_INTERVAL_SECS,
            "must be positive",
            raw,
        ));
    }
    Ok(Duration::from_secs(secs))
}
