//! Interval and retention grammars
//!
//! Intervals are written `<count><unit>` with unit `m`, `h`, `d` or `w`.
//! Retention policies are a run of `<count><period>` tokens with period
//! letters `M` (minute), `h`, `d`, `w`, `m` (month) and `y`; letters are
//! case-sensitive and unknown tokens are skipped.

use serde::{Deserialize, Serialize};
use snapsched_util::{Result, SnapError};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Unit of a schedule interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Minute,
    Hour,
    Day,
    Week,
}

impl IntervalUnit {
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'm' => Some(Self::Minute),
            'h' => Some(Self::Hour),
            'd' => Some(Self::Day),
            'w' => Some(Self::Week),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Minute => 'm',
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3600,
            Self::Day => 86400,
            Self::Week => 604800,
        }
    }
}

/// Longest accepted interval, about a century. Longer cadences push the
/// next firing out of the representable date range.
pub const MAX_INTERVAL_SECS: u64 = 5200 * 604800;

/// How often a schedule fires, e.g. `2m` or `1d`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    count: u32,
    unit: IntervalUnit,
}

impl Interval {
    pub fn new(count: u32, unit: IntervalUnit) -> Result<Self> {
        if count == 0 {
            return Err(SnapError::validation("interval count must be greater than zero"));
        }
        let interval = Self { count, unit };
        if interval.as_secs() > MAX_INTERVAL_SECS {
            return Err(SnapError::validation(format!(
                "interval {} is longer than the maximum of {}w",
                interval,
                MAX_INTERVAL_SECS / IntervalUnit::Week.seconds()
            )));
        }
        Ok(interval)
    }

    /// Parse an interval spec such as `15m`
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let invalid = || {
            SnapError::validation(format!(
                "invalid interval '{}', expected <count><m|h|d|w>",
                spec
            ))
        };

        let unit_char = spec.chars().last().ok_or_else(invalid)?;
        let unit = IntervalUnit::from_letter(unit_char).ok_or_else(invalid)?;
        let digits = &spec[..spec.len() - unit_char.len_utf8()];

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let count: u32 = digits.parse().map_err(|_| invalid())?;

        Self::new(count, unit)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> IntervalUnit {
        self.unit
    }

    /// Interval length in seconds; two intervals with the same length are
    /// the same schedule cadence (`60m` and `1h`).
    pub fn as_secs(&self) -> u64 {
        self.count as u64 * self.unit.seconds()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.letter())
    }
}

impl FromStr for Interval {
    type Err = SnapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Interval {
    type Error = SnapError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.to_string()
    }
}

/// Granularity at which snapshots are retained
///
/// Declaration order is the order in which retention passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::Minute,
        Period::Hour,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Year,
    ];

    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'M' => Some(Self::Minute),
            'h' => Some(Self::Hour),
            'd' => Some(Self::Day),
            'w' => Some(Self::Week),
            'm' => Some(Self::Month),
            'y' => Some(Self::Year),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Minute => 'M',
            Self::Hour => 'h',
            Self::Day => 'd',
            Self::Week => 'w',
            Self::Month => 'm',
            Self::Year => 'y',
        }
    }
}

/// Per-period keep counts
///
/// An empty policy keeps every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RetentionPolicy {
    counts: BTreeMap<Period, u32>,
}

impl RetentionPolicy {
    /// Parse a retention spec such as `7d4w12m`.
    ///
    /// Never fails: tokens with an unknown period letter, and stray
    /// characters, are skipped. A repeated period keeps the last count.
    pub fn parse(spec: &str) -> Self {
        let mut policy = Self::default();
        let mut digits = String::new();

        for c in spec.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            if !digits.is_empty()
                && let Some(period) = Period::from_letter(c)
            {
                let count = digits.parse::<u32>().unwrap_or(u32::MAX);
                policy = policy.with(period, count);
            }
            digits.clear();
        }

        policy
    }

    /// Set the keep count for a period; zero removes it.
    pub fn with(mut self, period: Period, count: u32) -> Self {
        if count == 0 {
            self.counts.remove(&period);
        } else {
            self.counts.insert(period, count);
        }
        self
    }

    pub fn get(&self, period: Period) -> u32 {
        self.counts.get(&period).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Configured periods in pass order
    pub fn iter(&self) -> impl Iterator<Item = (Period, u32)> + '_ {
        self.counts.iter().map(|(p, c)| (*p, *c))
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (period, count) in self.iter() {
            write!(f, "{}{}", count, period.letter())?;
        }
        Ok(())
    }
}

impl From<String> for RetentionPolicy {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RetentionPolicy> for String {
    fn from(policy: RetentionPolicy) -> Self {
        policy.to_string()
    }
}
