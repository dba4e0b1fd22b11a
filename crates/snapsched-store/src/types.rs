//! Rule records exchanged with the store

use chrono::{DateTime, Utc};
use snapsched_api::{Interval, RetentionPolicy};

/// A rule to insert
#[derive(Debug, Clone)]
pub struct NewRule {
    pub path: String,
    pub interval: Interval,
    pub retention: RetentionPolicy,
    pub start: DateTime<Utc>,
    pub subvol: Option<String>,
    pub created: DateTime<Utc>,
}

/// A rule of an active path, as needed to schedule it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRule {
    pub path: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub retention: RetentionPolicy,
}
