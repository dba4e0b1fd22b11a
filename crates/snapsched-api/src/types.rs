//! Schedule views shared by the engine and clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snapsched_util::FsName;

use crate::{Interval, RetentionPolicy};

/// One row of a schedule listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleInfo {
    pub path: String,
    pub schedule: Interval,
    pub retention: RetentionPolicy,
}

/// Full view of one rule, with its path's attributes and run bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDetails {
    pub path: String,
    pub fs: FsName,
    pub subvol: Option<String>,
    /// Inactive paths keep their rules but are never scheduled
    pub active: bool,
    pub schedule: Interval,
    pub retention: RetentionPolicy,
    /// Anchor the firing cadence is aligned to
    pub start: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub last_pruned: Option<DateTime<Utc>>,
    pub created_count: u64,
    pub pruned_count: u64,
}

impl ScheduleDetails {
    pub fn info(&self) -> ScheduleInfo {
        ScheduleInfo {
            path: self.path.clone(),
            schedule: self.schedule,
            retention: self.retention.clone(),
        }
    }
}

/// The wakeup currently armed for a filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextSnapshot {
    pub path: String,
    pub schedule: Interval,
    pub due_at: DateTime<Utc>,
}

/// Scheduler status of one loaded filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStatus {
    pub fs: FsName,
    /// Number of active paths with at least one rule
    pub active_paths: usize,
    pub next: Option<NextSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn details_serialize_text_forms() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let details = ScheduleDetails {
            path: "/volumes/a".into(),
            fs: FsName::new("cephfs"),
            subvol: None,
            active: true,
            schedule: Interval::parse("1h").unwrap(),
            retention: RetentionPolicy::parse("24h7d"),
            start: at,
            created: at,
            first: None,
            last: None,
            last_pruned: None,
            created_count: 0,
            pruned_count: 0,
        };

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["schedule"], "1h");
        assert_eq!(json["retention"], "24h7d");
        assert_eq!(json["fs"], "cephfs");

        let parsed: ScheduleDetails = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, details);
        assert_eq!(parsed.info().path, "/volumes/a");
    }
}
