//! Environment variable names and retry defaults.
//!
//! # Design
//! - Centralize env names so the CLI, tests and docs agree on spelling.
//! - Keep time-based defaults explicit for auditability.

use std::time::Duration;

/// Skips the workload-stop announcement in the confirmation prompt when set to `1`.
pub const ENV_CLUSTER_NO_STOP: &str = "CLUSTER_NO_STOP";
/// Skips cluster evacuation when set to `1`.
pub const ENV_CLUSTER_NO_EVACUATE: &str = "CLUSTER_NO_EVACUATE";
/// Misspelled variant of [`ENV_CLUSTER_NO_EVACUATE`] still honoured for existing runbooks.
pub const ENV_CLUSTER_NO_EVACUATE_LEGACY: &str = "CLUSTER_NO_EVACUTE";
/// Overrides the convergence warm-up and poll interval, in whole seconds.
pub const ENV_POLL_INTERVAL_SECS: &str = "LXD_TO_INCUS_POLL_INTERVAL_SECS";
/// Selects the log output format (`json` or `pretty`).
pub const ENV_LOG_FORMAT: &str = "LXD_TO_INCUS_LOG_FORMAT";

/// Delay before the first convergence poll.
pub const CONVERGENCE_WARMUP: Duration = Duration::from_secs(30);
/// Delay between convergence polls.
pub const CONVERGENCE_INTERVAL: Duration = Duration::from_secs(30);

/// Value that switches a boolean environment toggle on.
pub(crate) const ENABLED: &str = "1";
