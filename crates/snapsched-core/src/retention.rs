//! Retention evaluation
//!
//! Decides which scheduled snapshots of a path survive a prune pass. Pure:
//! takes snapshot names and a policy, returns the names to keep.

use chrono::{DateTime, Utc};
use snapsched_api::{Period, RetentionPolicy};
use snapsched_util::parse_snapshot_name;
use std::collections::BTreeSet;

/// A scheduled snapshot considered for pruning
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    pub name: String,
    pub taken_at: DateTime<Utc>,
}

/// Scheduled snapshots among directory entry names, newest first.
///
/// Entries that do not follow the scheduled-name pattern are left out, so
/// snapshots taken by hand are never pruned.
pub fn candidates<I, S>(names: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut found: Vec<Candidate> = names
        .into_iter()
        .map(Into::into)
        .filter_map(|name| {
            parse_snapshot_name(&name).map(|taken_at| Candidate { name, taken_at })
        })
        .collect();
    found.sort_by(|a, b| b.name.cmp(&a.name));
    found
}

/// Bucket format of a period; two snapshots in the same bucket count once.
pub fn bucket_format(period: Period) -> &'static str {
    match period {
        Period::Minute => "%Y-%m-%d-%H_%M",
        Period::Hour => "%Y-%m-%d-%H",
        Period::Day => "%Y-%m-%d",
        Period::Week => "%G-%V",
        Period::Month => "%Y-%m",
        Period::Year => "%Y",
    }
}

/// Names of the candidates `policy` keeps.
///
/// Each period walks the candidates newest first and admits the newest
/// snapshot of every bucket it has not seen yet, until its count is used
/// up. A snapshot already admitted by an earlier period does not use up a
/// slot. An empty policy keeps everything.
pub fn keep_set(candidates: &[Candidate], policy: &RetentionPolicy) -> BTreeSet<String> {
    if policy.is_empty() {
        return candidates.iter().map(|c| c.name.clone()).collect();
    }

    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| b.name.cmp(&a.name));

    let mut keep = BTreeSet::new();
    for (period, count) in policy.iter() {
        let format = bucket_format(period);
        let mut remaining = count;
        let mut last_bucket: Option<String> = None;

        for candidate in &ordered {
            let bucket = candidate.taken_at.format(format).to_string();
            if last_bucket.as_deref() == Some(bucket.as_str()) {
                continue;
            }
            last_bucket = Some(bucket);

            if keep.insert(candidate.name.clone()) {
                remaining -= 1;
            }
            if remaining == 0 {
                break;
            }
        }
    }

    keep
}

/// Candidates to delete: everything not in the keep set.
pub fn prune_list(candidates: &[Candidate], policy: &RetentionPolicy) -> Vec<String> {
    let keep = keep_set(candidates, policy);
    candidates
        .iter()
        .filter(|c| !keep.contains(&c.name))
        .map(|c| c.name.clone())
        .collect()
}
