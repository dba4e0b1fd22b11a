//! Time utilities for snapsched
//!
//! All schedule arithmetic and snapshot names use UTC.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `SNAPSCHED_MOCK_TIME` environment variable can be set
//! to override the wall clock for scheduling and snapshot naming. Mock time
//! advances at the same rate as real time.
//!
//! Format: `YYYY-MM-DD HH:MM:SS`, interpreted as UTC (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use std::sync::OnceLock;
use std::time::Duration;

use crate::{Result, SnapError};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "SNAPSCHED_MOCK_TIME";

/// Prefix of every snapshot created by the scheduler
pub const SNAPSHOT_PREFIX: &str = "scheduled-";

/// strftime format of the timestamp part of a scheduled snapshot name
pub const SNAPSHOT_TS_FORMAT: &str = "%Y-%m-%d-%H_%M_%S";

/// Cached offset between mock time and real time at process start.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // Internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        let mock_dt = Utc.from_utc_datetime(&naive_dt);
                        let offset = mock_dt.signed_duration_since(chrono::Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current UTC time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // The wrapper that provides mock time support
pub fn now() -> DateTime<Utc> {
    let real_now = chrono::Utc::now();

    if let Some(offset) = get_mock_time_offset() {
        real_now + offset
    } else {
        real_now
    }
}

/// Build the name of a scheduled snapshot taken at `at`.
pub fn snapshot_name(at: &DateTime<Utc>) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, at.format(SNAPSHOT_TS_FORMAT))
}

/// Parse the timestamp out of a scheduled snapshot name.
///
/// Returns `None` for names that do not follow the scheduled-name pattern,
/// such as snapshots taken by hand.
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let ts = name.strip_prefix(SNAPSHOT_PREFIX)?;
    NaiveDateTime::parse_from_str(ts, SNAPSHOT_TS_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Parse a schedule start anchor.
///
/// Accepts RFC 3339 (`2024-01-01T06:00:00+02:00`) or a zone-less
/// `YYYY-MM-DDTHH:MM[:SS]`, which is taken as UTC.
pub fn parse_start(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)));
    }

    Err(SnapError::validation(format!(
        "invalid start time '{}', expected ISO 8601 (e.g. 2024-01-01T00:00:00)",
        s
    )))
}

/// Canonical text form of a timestamp as stored in the schedule database.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a timestamp previously produced by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Default start anchor: midnight UTC of the day containing `now`.
pub fn midnight_of(now: &DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(chrono::NaiveTime::MIN))
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
