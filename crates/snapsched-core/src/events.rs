//! Outcome of a snapshot firing

use snapsched_util::FsName;

/// What happened to the snapshot a firing tried to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// Snapshot created under this name
    Created(String),

    /// Creation failed; the rule stays scheduled unless deactivated
    Failed(String),
}

/// Report of one firing, for logging and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireReport {
    pub fs: FsName,
    pub path: String,
    pub outcome: SnapshotOutcome,

    /// The path was deactivated after repeated "not found" failures
    pub deactivated: bool,

    /// Snapshots removed by the prune pass
    pub pruned: usize,
}

impl FireReport {
    pub fn created(&self) -> bool {
        matches!(self.outcome, SnapshotOutcome::Created(_))
    }
}
