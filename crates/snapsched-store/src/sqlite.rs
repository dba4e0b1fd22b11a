//! SQLite schedule store mirrored to an object store

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use snapsched_api::{Interval, RetentionPolicy, ScheduleDetails, ScheduleInfo};
use snapsched_host_api::{ObjectStore, ObjectStoreError};
use snapsched_util::{format_timestamp, is_path_under, normalize_path, parse_timestamp, FsName};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dump::{dump_database, load_database};
use crate::schema::{DB_OBJECT_NAME, SCHEMA};
use crate::{ActiveRule, NewRule, StoreError, StoreResult};

const RULE_COLUMNS: &str = "s.path, s.subvol, s.active, m.schedule, m.retention, m.start, \
     m.created, m.first, m.last, m.last_pruned, m.created_count, m.pruned_count";

/// Schedule database of one filesystem
///
/// Every mutation runs in a transaction that commits only once the dump of
/// the resulting database has been written to the object store, so the
/// in-memory state never runs ahead of the persisted one.
pub struct ScheduleStore {
    fs: FsName,
    conn: Connection,
    objects: Arc<dyn ObjectStore>,
}

impl ScheduleStore {
    /// Open the store of `fs`, restoring it from `objects` when a dump exists.
    pub fn open(fs: FsName, objects: Arc<dyn ObjectStore>) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;

        match objects.stat(DB_OBJECT_NAME) {
            Ok(size) => {
                let bytes = objects.read(DB_OBJECT_NAME, size)?;
                let sql = String::from_utf8(bytes).map_err(|e| StoreError::Corruption {
                    fs: fs.clone(),
                    message: e.to_string(),
                })?;
                load_database(&conn, &fs, &sql)?;
                info!(fs = %fs, bytes = size, "Schedule database restored");
            }
            Err(ObjectStoreError::NotFound(_)) => {
                conn.execute_batch(SCHEMA)?;
                info!(fs = %fs, "No persisted schedules, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { fs, conn, objects })
    }

    /// Add a rule, creating its path if needed.
    pub fn add_rule(&mut self, rule: NewRule) -> StoreResult<()> {
        let path = normalize_path(&rule.path)?;
        let start = format_timestamp(&rule.start);
        let created = format_timestamp(&rule.created);
        let repeat = rule.interval.as_secs() as i64;

        self.mutate("add_rule", |tx| {
            let id = match path_id(tx, &path)? {
                Some(id) => id,
                None => {
                    tx.execute(
                        "INSERT INTO schedules (path, subvol, active) VALUES (?1, ?2, 1)",
                        params![path, rule.subvol],
                    )?;
                    tx.last_insert_rowid()
                }
            };

            let exists = tx
                .query_row(
                    "SELECT 1 FROM schedules_meta \
                     WHERE schedule_id = ?1 AND start = ?2 AND repeat = ?3",
                    params![id, start, repeat],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Err(StoreError::DuplicateRule(format!(
                    "{} every {} from {}",
                    path, rule.interval, start
                )));
            }

            tx.execute(
                "INSERT INTO schedules_meta \
                 (schedule_id, start, created, repeat, schedule, retention) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    start,
                    created,
                    repeat,
                    rule.interval.to_string(),
                    rule.retention.to_string()
                ],
            )?;
            Ok(())
        })?;

        info!(
            fs = %self.fs,
            path = %path,
            schedule = %rule.interval,
            retention = %rule.retention,
            start = %start,
            "Schedule rule added"
        );
        Ok(())
    }

    /// Remove rules of a path.
    ///
    /// Without interval and start the whole path goes. Otherwise the
    /// matching rules go, and the path with them once it has none left.
    /// Returns the number of rules removed.
    pub fn remove_rule(
        &mut self,
        path: &str,
        interval: Option<Interval>,
        start: Option<DateTime<Utc>>,
    ) -> StoreResult<usize> {
        let path = normalize_path(path)?;
        let repeat = interval.map(|i| i.as_secs() as i64);
        let start = start.map(|s| format_timestamp(&s));

        let removed = self.mutate("remove_rule", |tx| {
            let id = path_id(tx, &path)?
                .ok_or_else(|| StoreError::NotFound(format!("no schedule for {}", path)))?;

            if repeat.is_none() && start.is_none() {
                let count = rule_count(tx, id)?;
                tx.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
                return Ok(count);
            }

            let removed = tx.execute(
                "DELETE FROM schedules_meta WHERE schedule_id = ?1 \
                 AND (?2 IS NULL OR repeat = ?2) AND (?3 IS NULL OR start = ?3)",
                params![id, repeat, start],
            )?;
            if removed == 0 {
                return Err(StoreError::NotFound(format!(
                    "no matching schedule for {}",
                    path
                )));
            }
            if rule_count(tx, id)? == 0 {
                tx.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
            }
            Ok(removed)
        })?;

        info!(fs = %self.fs, path = %path, removed, "Schedule rules removed");
        Ok(removed)
    }

    /// Rules at `path`, or at and below it when `recursive`.
    pub fn list_rules(&self, path: &str, recursive: bool) -> StoreResult<Vec<ScheduleInfo>> {
        let path = normalize_path(path)?;
        let rules = self.query_rules(None)?;

        Ok(rules
            .into_iter()
            .filter(|r| {
                if recursive {
                    is_path_under(&r.path, &path)
                } else {
                    r.path == path
                }
            })
            .map(|r| r.info())
            .collect())
    }

    /// Full details of every rule at exactly `path`.
    pub fn get_rules(&self, path: &str) -> StoreResult<Vec<ScheduleDetails>> {
        let path = normalize_path(path)?;
        self.query_rules(Some(&path))
    }

    /// Turn scheduling of a path on or off without touching its rules.
    pub fn set_active(&mut self, path: &str, active: bool) -> StoreResult<()> {
        let path = normalize_path(path)?;

        self.mutate("set_active", |tx| {
            let updated = tx.execute(
                "UPDATE schedules SET active = ?2 WHERE path = ?1",
                params![path, active],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!("no schedule for {}", path)));
            }
            Ok(())
        })?;

        info!(fs = %self.fs, path = %path, active, "Schedule activation changed");
        Ok(())
    }

    /// Note a snapshot taken by a rule at `at`.
    pub fn record_snapshot(
        &mut self,
        path: &str,
        interval: Interval,
        start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let path = normalize_path(path)?;
        let at = format_timestamp(&at);

        self.update_rule(
            "record_snapshot",
            &path,
            interval,
            start,
            "first = COALESCE(first, ?4), last = ?4, created_count = created_count + 1",
            params![path, interval.as_secs() as i64, format_timestamp(&start), at],
        )
    }

    /// Note a prune pass of a rule at `at` that removed `count` snapshots.
    pub fn record_prune(
        &mut self,
        path: &str,
        interval: Interval,
        start: DateTime<Utc>,
        at: DateTime<Utc>,
        count: usize,
    ) -> StoreResult<()> {
        let path = normalize_path(path)?;
        let at = format_timestamp(&at);

        self.update_rule(
            "record_prune",
            &path,
            interval,
            start,
            "last_pruned = ?4, pruned_count = pruned_count + ?5",
            params![
                path,
                interval.as_secs() as i64,
                format_timestamp(&start),
                at,
                count as i64
            ],
        )
    }

    /// Every rule of every active path, ordered by path then interval.
    pub fn timer_rules(&self) -> StoreResult<Vec<ActiveRule>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.path, m.schedule, m.start, m.retention \
             FROM schedules s JOIN schedules_meta m ON m.schedule_id = s.id \
             WHERE s.active = 1 \
             ORDER BY s.path, m.repeat, m.start",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut rules = Vec::new();
        for row in rows {
            let (path, schedule, start, retention) = row?;
            rules.push(ActiveRule {
                interval: self.parse_interval(&path, &schedule)?,
                start: self.parse_time(&path, &start)?,
                retention: RetentionPolicy::parse(&retention),
                path,
            });
        }
        Ok(rules)
    }

    /// Number of active paths
    pub fn active_path_count(&self) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM schedules WHERE active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// SQL dump of the current database, as persisted
    pub fn dump(&self) -> StoreResult<String> {
        Ok(dump_database(&self.conn)?)
    }

    fn update_rule(
        &mut self,
        what: &str,
        path: &str,
        interval: Interval,
        start: DateTime<Utc>,
        assignments: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<()> {
        let sql = format!(
            "UPDATE schedules_meta SET {} \
             WHERE schedule_id = (SELECT id FROM schedules WHERE path = ?1) \
             AND repeat = ?2 AND start = ?3",
            assignments
        );

        self.mutate(what, |tx| {
            let updated = tx.execute(&sql, params)?;
            if updated == 0 {
                return Err(StoreError::NotFound(format!(
                    "no schedule for {} every {} from {}",
                    path,
                    interval,
                    format_timestamp(&start)
                )));
            }
            Ok(())
        })?;

        debug!(fs = %self.fs, path = %path, schedule = %interval, op = what, "Rule updated");
        Ok(())
    }

    fn mutate<T>(
        &mut self,
        what: &str,
        op: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let tx = self.conn.transaction()?;
        let value = op(&tx)?;
        let dump = dump_database(&tx)?;

        if let Err(e) = self.objects.write_full(DB_OBJECT_NAME, dump.as_bytes()) {
            warn!(
                fs = %self.fs,
                op = what,
                error = %e,
                "Persisting schedule database failed, rolling back"
            );
            return Err(e.into());
        }

        tx.commit()?;
        debug!(fs = %self.fs, op = what, bytes = dump.len(), "Schedule database persisted");
        Ok(value)
    }

    fn query_rules(&self, path: Option<&str>) -> StoreResult<Vec<ScheduleDetails>> {
        let sql = format!(
            "SELECT {} FROM schedules s JOIN schedules_meta m ON m.schedule_id = s.id \
             WHERE (?1 IS NULL OR s.path = ?1) \
             ORDER BY s.path, m.repeat, m.start",
            RULE_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([path], RawRule::from_row)?;

        let mut rules = Vec::new();
        for row in rows {
            rules.push(self.details(row?)?);
        }
        Ok(rules)
    }

    fn details(&self, raw: RawRule) -> StoreResult<ScheduleDetails> {
        let optional_time = |value: Option<String>| -> StoreResult<Option<DateTime<Utc>>> {
            value.map(|v| self.parse_time(&raw.path, &v)).transpose()
        };

        Ok(ScheduleDetails {
            fs: self.fs.clone(),
            subvol: raw.subvol.clone(),
            active: raw.active,
            schedule: self.parse_interval(&raw.path, &raw.schedule)?,
            retention: RetentionPolicy::parse(&raw.retention),
            start: self.parse_time(&raw.path, &raw.start)?,
            created: self.parse_time(&raw.path, &raw.created)?,
            first: optional_time(raw.first.clone())?,
            last: optional_time(raw.last.clone())?,
            last_pruned: optional_time(raw.last_pruned.clone())?,
            created_count: raw.created_count.max(0) as u64,
            pruned_count: raw.pruned_count.max(0) as u64,
            path: raw.path,
        })
    }

    fn parse_interval(&self, path: &str, value: &str) -> StoreResult<Interval> {
        Interval::parse(value).map_err(|e| StoreError::Corruption {
            fs: self.fs.clone(),
            message: format!("rule of {}: {}", path, e),
        })
    }

    fn parse_time(&self, path: &str, value: &str) -> StoreResult<DateTime<Utc>> {
        parse_timestamp(value).ok_or_else(|| StoreError::Corruption {
            fs: self.fs.clone(),
            message: format!("rule of {}: invalid timestamp '{}'", path, value),
        })
    }
}

struct RawRule {
    path: String,
    subvol: Option<String>,
    active: bool,
    schedule: String,
    retention: String,
    start: String,
    created: String,
    first: Option<String>,
    last: Option<String>,
    last_pruned: Option<String>,
    created_count: i64,
    pruned_count: i64,
}

impl RawRule {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            subvol: row.get(1)?,
            active: row.get(2)?,
            schedule: row.get(3)?,
            retention: row.get(4)?,
            start: row.get(5)?,
            created: row.get(6)?,
            first: row.get(7)?,
            last: row.get(8)?,
            last_pruned: row.get(9)?,
            created_count: row.get(10)?,
            pruned_count: row.get(11)?,
        })
    }
}

fn path_id(conn: &Connection, path: &str) -> StoreResult<Option<i64>> {
    Ok(conn
        .query_row("SELECT id FROM schedules WHERE path = ?1", [path], |row| {
            row.get(0)
        })
        .optional()?)
}

fn rule_count(conn: &Connection, id: i64) -> StoreResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM schedules_meta WHERE schedule_id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}
