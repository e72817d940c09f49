//! Per-phase record of a migration run.

use serde::{Deserialize, Serialize};

/// Migration phases in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Find the installed source and target.
    Discover,
    /// Connect to both daemons.
    Connect,
    /// Pre-flight checks.
    Validate,
    /// Build the migration plan.
    GatherRewrites,
    /// Operator confirmation.
    Confirm,
    /// Evacuate cluster members.
    Evacuate,
    /// Stop both daemons.
    Stop,
    /// Detach runtime mounts under the target.
    Unmount,
    /// Remove previous target data.
    Wipe,
    /// Move the source data to the target paths.
    Move,
    /// Database format step.
    MigrateDatabase,
    /// Write the database patch and run the plan's commands.
    ApplyRewrites,
    /// Prune obsolete paths and repair symlinks.
    Cleanup,
    /// Start the target daemon.
    StartTarget,
    /// Wait for every member to run the target.
    Converge,
    /// Restore cluster members.
    Restore,
    /// Check the migrated target answers.
    ValidateTarget,
    /// Remove the source package.
    Purge,
}

impl Phase {
    /// Every phase in execution order.
    pub const ALL: [Self; 18] = [
        Self::Discover,
        Self::Connect,
        Self::Validate,
        Self::GatherRewrites,
        Self::Confirm,
        Self::Evacuate,
        Self::Stop,
        Self::Unmount,
        Self::Wipe,
        Self::Move,
        Self::MigrateDatabase,
        Self::ApplyRewrites,
        Self::Cleanup,
        Self::StartTarget,
        Self::Converge,
        Self::Restore,
        Self::ValidateTarget,
        Self::Purge,
    ];

    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Connect => "connect",
            Self::Validate => "validate",
            Self::GatherRewrites => "gather_rewrites",
            Self::Confirm => "confirm",
            Self::Evacuate => "evacuate",
            Self::Stop => "stop",
            Self::Unmount => "unmount",
            Self::Wipe => "wipe",
            Self::Move => "move",
            Self::MigrateDatabase => "migrate_database",
            Self::ApplyRewrites => "apply_rewrites",
            Self::Cleanup => "cleanup",
            Self::StartTarget => "start_target",
            Self::Converge => "converge",
            Self::Restore => "restore",
            Self::ValidateTarget => "validate_target",
            Self::Purge => "purge",
        }
    }
}

/// Phase state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Running.
    Started,
    /// Finished successfully.
    Completed,
    /// Aborted the run.
    Failed,
    /// Not applicable to this run.
    Skipped,
}

impl PhaseStatus {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Latest state of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase.
    pub phase: Phase,
    /// Latest status.
    pub status: PhaseStatus,
    /// Human-readable detail.
    pub detail: Option<String>,
}

pub(crate) enum PhaseOutcome {
    Completed(Option<String>),
    Skipped(&'static str),
}

impl PhaseOutcome {
    pub(crate) const fn status(&self) -> PhaseStatus {
        match self {
            Self::Completed(_) => PhaseStatus::Completed,
            Self::Skipped(_) => PhaseStatus::Skipped,
        }
    }

    pub(crate) fn into_detail(self) -> Option<String> {
        match self {
            Self::Completed(detail) => detail,
            Self::Skipped(reason) => Some(reason.to_string()),
        }
    }
}

/// Ordered phase records of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    phases: Vec<PhaseRecord>,
}

impl MigrationReport {
    /// Records in the order phases were first seen.
    #[must_use]
    pub fn phases(&self) -> &[PhaseRecord] {
        &self.phases
    }

    /// Latest status of `phase`, if it was reached.
    #[must_use]
    pub fn status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phases
            .iter()
            .find(|record| record.phase == phase)
            .map(|record| record.status)
    }

    /// Phases that completed, in order.
    #[must_use]
    pub fn completed(&self) -> Vec<Phase> {
        self.with_status(PhaseStatus::Completed)
    }

    /// Phases that were skipped, in order.
    #[must_use]
    pub fn skipped(&self) -> Vec<Phase> {
        self.with_status(PhaseStatus::Skipped)
    }

    fn with_status(&self, status: PhaseStatus) -> Vec<Phase> {
        self.phases
            .iter()
            .filter(|record| record.status == status)
            .map(|record| record.phase)
            .collect()
    }

    /// Insert or update the record for `phase`. Returns whether anything changed.
    pub(crate) fn update_phase(
        &mut self,
        phase: Phase,
        status: PhaseStatus,
        detail: Option<String>,
    ) -> bool {
        if let Some(record) = self.phases.iter_mut().find(|record| record.phase == phase) {
            if record.status == status && record.detail == detail {
                return false;
            }
            record.status = status;
            record.detail = detail;
        } else {
            self.phases.push(PhaseRecord {
                phase,
                status,
                detail,
            });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_phase_tracks_latest_status() {
        let mut report = MigrationReport::default();
        assert!(report.update_phase(Phase::Stop, PhaseStatus::Started, None));
        assert!(!report.update_phase(Phase::Stop, PhaseStatus::Started, None));
        assert!(report.update_phase(
            Phase::Stop,
            PhaseStatus::Completed,
            Some("lxd stopped".into())
        ));
        assert!(report.update_phase(
            Phase::Evacuate,
            PhaseOutcome::Skipped("not clustered").status(),
            None
        ));

        assert_eq!(report.phases().len(), 2);
        assert_eq!(report.status(Phase::Stop), Some(PhaseStatus::Completed));
        assert_eq!(report.completed(), vec![Phase::Stop]);
        assert_eq!(report.skipped(), vec![Phase::Evacuate]);
        assert_eq!(report.status(Phase::Purge), None);
    }

    #[test]
    fn report_serialises_snake_case() -> Result<(), serde_json::Error> {
        let mut report = MigrationReport::default();
        report.update_phase(
            Phase::GatherRewrites,
            PhaseStatus::Skipped,
            PhaseOutcome::Skipped("no ovn").into_detail(),
        );
        let json = serde_json::to_value(&report)?;
        assert_eq!(json["phases"][0]["phase"], "gather_rewrites");
        assert_eq!(json["phases"][0]["status"], "skipped");
        assert_eq!(json["phases"][0]["detail"], "no ovn");
        assert_eq!(Phase::ALL.len(), 18);
        assert_eq!(Phase::ALL[17].as_str(), "purge");
        Ok(())
    }
}
