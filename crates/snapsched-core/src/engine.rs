//! Snapshot scheduler

use chrono::{DateTime, Utc};
use snapsched_api::{FsStatus, Interval, NextSnapshot, RetentionPolicy, ScheduleDetails, ScheduleInfo};
use snapsched_config::SchedulerSettings;
use snapsched_host_api::{FsClient, FsConnector, FsError};
use snapsched_store::{NewRule, ScheduleStore};
use snapsched_util::{
    join_path, midnight_of, normalize_path, now, parse_start, snapshot_name, FsName, Result,
    SnapError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    candidates, next_wakeup, prune_list, rule_key, FireReport, FiredBoundaries, Owed,
    SnapshotOutcome, TimerEngine, Wakeup,
};

/// Loaded state of one filesystem
struct FsState {
    store: ScheduleStore,
    /// Consecutive "path not found" snapshot failures per path
    failures: HashMap<String, u32>,
    fired: FiredBoundaries,
}

/// Per-filesystem lock; empty until the filesystem's schedules load
#[derive(Default)]
struct FsSlot {
    state: Mutex<Option<FsState>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The snapshot scheduler
///
/// Operator calls and firings of one filesystem serialize on that
/// filesystem's lock. Filesystem client calls are made without it.
pub struct SnapScheduler {
    connector: Arc<dyn FsConnector>,
    settings: SchedulerSettings,
    slots: Mutex<HashMap<FsName, Arc<FsSlot>>>,
    timer: TimerEngine,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SnapScheduler {
    pub fn new(connector: Arc<dyn FsConnector>, settings: SchedulerSettings) -> Self {
        info!(
            filesystems = connector.filesystems().len(),
            snapshot_dir = %settings.snapshot_dir,
            max_consecutive_failures = settings.max_consecutive_failures,
            "Snapshot scheduler initialized"
        );

        Self {
            connector,
            settings,
            slots: Mutex::new(HashMap::new()),
            timer: TimerEngine::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start delivering expired deadlines. Must be called within a tokio
    /// runtime; deadlines armed earlier fire once it runs.
    pub fn start(self: &Arc<Self>) {
        let (fire_tx, mut fire_rx) = mpsc::unbounded_channel();
        let Some(worker) = self.timer.spawn(fire_tx) else {
            warn!("Snapshot scheduler already started");
            return;
        };

        let this = Arc::clone(self);
        let dispatcher = tokio::spawn(async move {
            while let Some(wakeup) = fire_rx.recv().await {
                tokio::spawn(Arc::clone(&this).dispatch(wakeup));
            }
            debug!("Snapshot dispatcher exited");
        });

        lock(&self.tasks).extend([worker, dispatcher]);
        info!("Snapshot scheduler started");
    }

    /// Cancel every armed deadline and stop the background tasks. Firings
    /// already in progress run to completion.
    pub fn shutdown(&self) {
        self.timer.shutdown();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!("Snapshot scheduler stopped");
    }

    /// Load every known filesystem so that existing schedules resume.
    ///
    /// Returns the number of filesystems loaded; failures are logged.
    pub fn load_all(&self) -> usize {
        let mut loaded = 0;
        for fs in self.connector.filesystems() {
            match self.with_state(&fs, |_| Ok(())) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(fs = %fs, error = %e, "Filesystem not loaded"),
            }
        }
        loaded
    }

    /// Add a rule. `start` defaults to midnight UTC today.
    pub fn add_schedule(
        &self,
        path: &str,
        schedule: &str,
        retention: Option<&str>,
        start: Option<&str>,
        fs: Option<FsName>,
        subvol: Option<String>,
    ) -> Result<()> {
        let fs = self.resolve_fs(fs)?;
        let path = normalize_path(path)?;
        let interval = Interval::parse(schedule)?;
        let retention = RetentionPolicy::parse(retention.unwrap_or_default());
        let now = now();
        let start = match start {
            Some(start) => parse_start(start)?,
            None => midnight_of(&now),
        };

        self.with_state(&fs, |state| {
            state.store.add_rule(NewRule {
                path: path.clone(),
                interval,
                retention,
                start,
                subvol,
                created: now,
            })?;
            self.recompute_locked(&fs, state, now, None);
            Ok(())
        })
    }

    /// Remove rules of a path; all of them when `schedule` and `start` are
    /// both omitted. Returns the number of rules removed.
    pub fn rm_schedule(
        &self,
        path: &str,
        schedule: Option<&str>,
        start: Option<&str>,
        fs: Option<FsName>,
    ) -> Result<usize> {
        let fs = self.resolve_fs(fs)?;
        let path = normalize_path(path)?;
        let interval = schedule.map(Interval::parse).transpose()?;
        let start = start.map(parse_start).transpose()?;

        self.with_state(&fs, |state| {
            let removed = state.store.remove_rule(&path, interval, start)?;
            state.failures.remove(&path);
            self.recompute_locked(&fs, state, now(), None);
            Ok(removed)
        })
    }

    /// Rules at `path`, or at and below it when `recursive`.
    pub fn list_schedules(
        &self,
        path: &str,
        recursive: bool,
        fs: Option<FsName>,
    ) -> Result<Vec<ScheduleInfo>> {
        let fs = self.resolve_fs(fs)?;
        self.with_state(&fs, |state| Ok(state.store.list_rules(path, recursive)?))
    }

    /// Full details of the rules at `path`; `NotFound` when there are none.
    pub fn get_schedule(&self, path: &str, fs: Option<FsName>) -> Result<Vec<ScheduleDetails>> {
        let fs = self.resolve_fs(fs)?;
        let details = self.with_state(&fs, |state| Ok(state.store.get_rules(path)?))?;
        if details.is_empty() {
            return Err(SnapError::not_found(format!("no schedule for {}", path)));
        }
        Ok(details)
    }

    pub fn activate(&self, path: &str, fs: Option<FsName>) -> Result<()> {
        self.set_active(path, fs, true)
    }

    pub fn deactivate(&self, path: &str, fs: Option<FsName>) -> Result<()> {
        self.set_active(path, fs, false)
    }

    /// Next wakeup of every loaded filesystem
    pub fn status(&self) -> Result<Vec<FsStatus>> {
        let mut slots: Vec<(FsName, Arc<FsSlot>)> = lock(&self.slots)
            .iter()
            .map(|(fs, slot)| (fs.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));

        let mut statuses = Vec::new();
        for (fs, slot) in slots {
            let guard = lock(&slot.state);
            let Some(state) = guard.as_ref() else {
                continue;
            };
            statuses.push(FsStatus {
                active_paths: state.store.active_path_count()?,
                next: self.timer.next_wakeup(&fs).map(|w| NextSnapshot {
                    path: w.path,
                    schedule: w.interval,
                    due_at: w.due_at,
                }),
                fs,
            });
        }
        Ok(statuses)
    }

    /// The wakeup armed for a filesystem
    pub fn next_wakeup(&self, fs: &FsName) -> Option<Wakeup> {
        self.timer.next_wakeup(fs)
    }

    /// Take the snapshot a wakeup asks for, re-arm, then prune.
    pub fn fire(&self, wakeup: Wakeup) -> FireReport {
        self.fire_at(wakeup, now())
    }

    /// [`SnapScheduler::fire`] with an explicit clock
    pub fn fire_at(&self, wakeup: Wakeup, at: DateTime<Utc>) -> FireReport {
        let fs = wakeup.fs.clone();
        let snap_dir = join_path(&wakeup.path, &self.settings.snapshot_dir);
        let name = snapshot_name(&at);
        // A deadline may expire a little early by the wall clock
        let anchor = at.max(wakeup.due_at);

        let mut report = FireReport {
            fs: fs.clone(),
            path: wakeup.path.clone(),
            outcome: SnapshotOutcome::Failed(String::new()),
            deactivated: false,
            pruned: 0,
        };

        let client = match self.connector.fs_client(&fs) {
            Ok(client) => client,
            Err(e) => {
                error!(fs = %fs, error = %e, "No filesystem client");
                report.outcome = SnapshotOutcome::Failed(e.to_string());
                self.recompute(&fs, anchor);
                return report;
            }
        };

        let created = client.mkdir(&join_path(&snap_dir, &name));
        report.outcome = match &created {
            Ok(()) => SnapshotOutcome::Created(name.clone()),
            Err(e) => SnapshotOutcome::Failed(e.to_string()),
        };

        let bookkeeping = self.with_state(&fs, |state| {
            state.fired.insert(
                rule_key(&wakeup.path, wakeup.interval, wakeup.start),
                wakeup.due_at,
            );
            let deactivated = self.record_firing(state, &wakeup, &name, &created, at);
            self.recompute_locked(&fs, state, anchor, Some(wakeup.due_at));
            Ok(deactivated)
        });
        match bookkeeping {
            Ok(deactivated) => report.deactivated = deactivated,
            Err(e) => error!(fs = %fs, path = %wakeup.path, error = %e, "Snapshot bookkeeping failed"),
        }

        if !wakeup.retention.is_empty() {
            report.pruned = self.prune(client.as_ref(), &wakeup, &snap_dir, at);
        }

        report
    }

    /// Apply a snapshot result to the store. Returns whether the path was
    /// deactivated.
    fn record_firing(
        &self,
        state: &mut FsState,
        wakeup: &Wakeup,
        name: &str,
        created: &std::result::Result<(), FsError>,
        at: DateTime<Utc>,
    ) -> bool {
        let fs = &wakeup.fs;
        let path = &wakeup.path;

        match created {
            Ok(()) => {
                info!(fs = %fs, path = %path, snapshot = %name, "Snapshot created");
                state.failures.remove(path);
                if let Err(e) = state
                    .store
                    .record_snapshot(path, wakeup.interval, wakeup.start, at)
                {
                    let err = SnapError::from(e);
                    if err.is_transient() {
                        warn!(fs = %fs, path = %path, error = %err, "Snapshot taken but not recorded");
                    } else {
                        error!(fs = %fs, path = %path, error = %err, "Failed to record snapshot");
                    }
                }
                false
            }
            Err(FsError::NotFound(_)) => {
                let count = state.failures.entry(path.clone()).or_insert(0);
                *count += 1;
                let failures = *count;
                warn!(fs = %fs, path = %path, failures, "Snapshot path not found");

                let limit = self.settings.max_consecutive_failures;
                if limit == 0 || failures < limit {
                    return false;
                }

                state.failures.remove(path);
                match state.store.set_active(path, false) {
                    Ok(()) => {
                        warn!(
                            fs = %fs,
                            path = %path,
                            failures,
                            "Path keeps missing, schedule deactivated"
                        );
                        true
                    }
                    Err(e) => {
                        error!(fs = %fs, path = %path, error = %e, "Failed to deactivate path");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(fs = %fs, path = %path, error = %e, "Snapshot creation failed");
                false
            }
        }
    }

    fn prune(
        &self,
        client: &dyn FsClient,
        wakeup: &Wakeup,
        snap_dir: &str,
        at: DateTime<Utc>,
    ) -> usize {
        let names = match client.readdir(snap_dir) {
            Ok(names) => names,
            Err(e) => {
                warn!(fs = %wakeup.fs, path = %wakeup.path, error = %e, "Cannot list snapshots");
                return 0;
            }
        };

        let found = candidates(names);
        let mut pruned = 0;
        for name in prune_list(&found, &wakeup.retention) {
            match client.rmdir(&join_path(snap_dir, &name)) {
                Ok(()) => {
                    debug!(fs = %wakeup.fs, path = %wakeup.path, snapshot = %name, "Snapshot pruned");
                    pruned += 1;
                }
                Err(e) => {
                    warn!(fs = %wakeup.fs, snapshot = %name, error = %e, "Failed to prune snapshot");
                }
            }
        }

        if pruned > 0 {
            info!(
                fs = %wakeup.fs,
                path = %wakeup.path,
                pruned,
                kept = found.len() - pruned,
                retention = %wakeup.retention,
                "Snapshots pruned"
            );
            let recorded = self.with_state(&wakeup.fs, |state| {
                Ok(state
                    .store
                    .record_prune(&wakeup.path, wakeup.interval, wakeup.start, at, pruned)?)
            });
            if let Err(e) = recorded {
                warn!(fs = %wakeup.fs, path = %wakeup.path, error = %e, "Failed to record prune");
            }
        }

        pruned
    }

    async fn dispatch(self: Arc<Self>, wakeup: Wakeup) {
        let fs = wakeup.fs.clone();
        let path = wakeup.path.clone();

        let worker = Arc::clone(&self);
        match tokio::task::spawn_blocking(move || worker.fire(wakeup)).await {
            Ok(report) => debug!(
                fs = %report.fs,
                path = %report.path,
                created = report.created(),
                pruned = report.pruned,
                "Firing finished"
            ),
            Err(e) => {
                error!(fs = %fs, path = %path, error = %e, "Snapshot firing panicked");
                let worker = Arc::clone(&self);
                let recomputed =
                    tokio::task::spawn_blocking(move || worker.recompute(&fs, now())).await;
                if let Err(e) = recomputed {
                    error!(error = %e, "Re-arming after failed firing panicked");
                }
            }
        }
    }

    fn set_active(&self, path: &str, fs: Option<FsName>, active: bool) -> Result<()> {
        let fs = self.resolve_fs(fs)?;
        let path = normalize_path(path)?;

        self.with_state(&fs, |state| {
            state.store.set_active(&path, active)?;
            state.failures.remove(&path);
            self.recompute_locked(&fs, state, now(), None);
            Ok(())
        })
    }

    fn resolve_fs(&self, fs: Option<FsName>) -> Result<FsName> {
        let fs = fs.or_else(|| self.connector.default_fs()).ok_or_else(|| {
            SnapError::validation("no filesystem given and no default filesystem configured")
        })?;

        if !self.connector.filesystems().contains(&fs) {
            return Err(SnapError::not_found(format!("unknown filesystem '{}'", fs)));
        }
        Ok(fs)
    }

    /// Run `op` under the filesystem's lock, loading its schedules first
    /// if needed. A filesystem that fails to load keeps no state, so the
    /// next call tries again.
    fn with_state<T>(&self, fs: &FsName, op: impl FnOnce(&mut FsState) -> Result<T>) -> Result<T> {
        let slot = lock(&self.slots).entry(fs.clone()).or_default().clone();
        let mut guard = lock(&slot.state);

        if guard.is_none() {
            let state = self.load(fs)?;
            self.recompute_locked(fs, &state, now(), None);
            *guard = Some(state);
        }
        let Some(state) = guard.as_mut() else {
            return Err(SnapError::internal(format!("state of '{}' missing after load", fs)));
        };

        op(state)
    }

    fn load(&self, fs: &FsName) -> Result<FsState> {
        let objects = self.connector.object_store(fs)?;
        match ScheduleStore::open(fs.clone(), objects) {
            Ok(store) => Ok(FsState {
                store,
                failures: HashMap::new(),
                fired: FiredBoundaries::new(),
            }),
            Err(e) => {
                let err = SnapError::from(e);
                error!(fs = %fs, error = %err, "Failed to load schedules");
                Err(err)
            }
        }
    }

    fn recompute(&self, fs: &FsName, now: DateTime<Utc>) {
        let result = self.with_state(fs, |state| {
            self.recompute_locked(fs, state, now, None);
            Ok(())
        });
        if let Err(e) = result {
            error!(fs = %fs, error = %e, "Cannot re-arm deadline");
        }
    }

    /// Arm the filesystem's soonest rule, or cancel when nothing is active.
    ///
    /// After a firing due at `fired_due`, rules that reached a boundary at or
    /// after it without firing yet are armed with no wait.
    fn recompute_locked(
        &self,
        fs: &FsName,
        state: &FsState,
        now: DateTime<Utc>,
        fired_due: Option<DateTime<Utc>>,
    ) {
        let owed = fired_due.map(|since| Owed {
            since,
            fired: &state.fired,
        });
        match state.store.timer_rules() {
            Ok(rules) => match next_wakeup(fs, &rules, now, owed.as_ref()) {
                Some((wakeup, wait)) => self.timer.arm(wakeup, wait),
                None => {
                    debug!(fs = %fs, "No active schedules");
                    self.timer.cancel(fs);
                }
            },
            Err(e) => {
                error!(fs = %fs, error = %e, "Cannot read schedules, deadline cancelled");
                self.timer.cancel(fs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use snapsched_host_api::{MemoryObjectStore, MockConnector, MockFs};
    use snapsched_store::DB_OBJECT_NAME;
    use std::time::Duration;

    const START: &str = "2024-01-01T00:00:00";

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn cephfs() -> FsName {
        FsName::new("cephfs")
    }

    fn scheduler_with(
        settings: SchedulerSettings,
    ) -> (SnapScheduler, Arc<MockFs>, Arc<MemoryObjectStore>) {
        let fs = Arc::new(MockFs::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let connector = MockConnector::new().with_fs("cephfs", fs.clone(), objects.clone());
        (
            SnapScheduler::new(Arc::new(connector), settings),
            fs,
            objects,
        )
    }

    fn scheduler() -> (SnapScheduler, Arc<MockFs>, Arc<MemoryObjectStore>) {
        scheduler_with(SchedulerSettings::default())
    }

    fn due(wakeup: Wakeup, due_at: DateTime<Utc>) -> Wakeup {
        Wakeup { due_at, ..wakeup }
    }

    #[test]
    fn add_list_get_remove() {
        let (sched, _, _) = scheduler();

        sched
            .add_schedule("/vol", "1h", Some("7d4w"), Some(START), None, None)
            .unwrap();
        sched.add_schedule("/vol/sub", "1d", None, None, None, None).unwrap();

        let listed = sched.list_schedules("/vol", true, None).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(sched.list_schedules("/vol", false, None).unwrap().len(), 1);

        let details = sched.get_schedule("/vol", None).unwrap();
        assert_eq!(details[0].retention.to_string(), "7d4w");
        assert_eq!(details[0].start, at(0, 0));
        assert_eq!(details[0].fs, cephfs());

        // Default anchor is midnight UTC
        let sub = sched.get_schedule("/vol/sub", None).unwrap();
        assert_eq!(sub[0].start, midnight_of(&sub[0].created));

        assert_eq!(sched.rm_schedule("/vol", None, None, None).unwrap(), 1);
        assert!(matches!(
            sched.get_schedule("/vol", None),
            Err(SnapError::NotFound(_))
        ));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (sched, _, _) = scheduler();

        assert!(matches!(
            sched.add_schedule("/vol", "2x", None, None, None, None),
            Err(SnapError::Validation(_))
        ));
        assert!(matches!(
            sched.add_schedule("vol", "1h", None, None, None, None),
            Err(SnapError::Validation(_))
        ));
        assert!(matches!(
            sched.add_schedule("/vol", "1h", None, Some("someday"), None, None),
            Err(SnapError::Validation(_))
        ));
        assert!(matches!(
            sched.add_schedule("/vol", "1h", None, None, Some(FsName::new("nope")), None),
            Err(SnapError::NotFound(_))
        ));
    }

    #[test]
    fn no_default_filesystem() {
        let sched = SnapScheduler::new(
            Arc::new(MockConnector::new()),
            SchedulerSettings::default(),
        );
        assert!(matches!(
            sched.list_schedules("/", true, None),
            Err(SnapError::Validation(_))
        ));
    }

    #[test]
    fn normalized_duplicates_are_rejected() {
        let (sched, _, _) = scheduler();
        sched
            .add_schedule("/d1/d2/../d2/./d3", "1h", None, Some(START), None, None)
            .unwrap();
        assert!(matches!(
            sched.add_schedule("/d1/d2/d3", "1h", None, Some(START), None, None),
            Err(SnapError::DuplicateRule(_))
        ));
    }

    #[test]
    fn mutations_rearm_the_deadline() {
        let (sched, _, _) = scheduler();
        assert!(sched.next_wakeup(&cephfs()).is_none());

        sched
            .add_schedule("/b", "1h", None, Some(START), None, None)
            .unwrap();
        sched
            .add_schedule("/a", "1h", None, Some(START), None, None)
            .unwrap();
        assert_eq!(sched.next_wakeup(&cephfs()).unwrap().path, "/a");

        sched.deactivate("/a", None).unwrap();
        assert_eq!(sched.next_wakeup(&cephfs()).unwrap().path, "/b");

        sched.rm_schedule("/b", Some("1h"), None, None).unwrap();
        assert!(sched.next_wakeup(&cephfs()).is_none());

        sched.activate("/a", None).unwrap();
        assert_eq!(sched.next_wakeup(&cephfs()).unwrap().path, "/a");
    }

    #[test]
    fn firing_creates_and_records_snapshot() {
        let (sched, fs, _) = scheduler();
        fs.add_dir("/vol");
        sched
            .add_schedule("/vol", "1h", None, Some(START), None, None)
            .unwrap();

        let wakeup = due(sched.next_wakeup(&cephfs()).unwrap(), at(1, 0));
        let report = sched.fire_at(wakeup, at(1, 0));
        assert_eq!(
            report.outcome,
            SnapshotOutcome::Created("scheduled-2024-01-01-01_00_00".into())
        );
        assert_eq!(
            fs.readdir("/vol/.snap").unwrap(),
            vec!["scheduled-2024-01-01-01_00_00".to_string()]
        );

        let details = &sched.get_schedule("/vol", None).unwrap()[0];
        assert_eq!(details.created_count, 1);
        assert_eq!(details.first, Some(at(1, 0)));
        assert_eq!(details.last, Some(at(1, 0)));

        // Re-armed for the following hour
        let next = sched.next_wakeup(&cephfs()).unwrap();
        assert_eq!(next.due_at, at(2, 0));
    }

    #[test]
    fn firing_prunes_by_retention() {
        let (sched, fs, _) = scheduler();
        fs.add_dir("/vol");
        fs.mkdir("/vol/.snap/manual").unwrap();
        sched
            .add_schedule("/vol", "1m", Some("3M"), Some(START), None, None)
            .unwrap();
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();

        for minute in 1..=10 {
            sched.fire_at(wakeup.clone(), at(0, minute));
        }

        let mut names = fs.readdir("/vol/.snap").unwrap();
        names.sort();
        assert_eq!(
            names,
            vec![
                "manual",
                "scheduled-2024-01-01-00_08_00",
                "scheduled-2024-01-01-00_09_00",
                "scheduled-2024-01-01-00_10_00",
            ]
        );

        let details = &sched.get_schedule("/vol", None).unwrap()[0];
        assert_eq!(details.created_count, 10);
        assert_eq!(details.pruned_count, 7);
        assert_eq!(details.last_pruned, Some(at(0, 10)));
    }

    #[test]
    fn coincident_rules_all_fire() {
        let (sched, fs, _) = scheduler();
        fs.add_dir("/a");
        fs.add_dir("/b");
        sched
            .add_schedule("/a", "1m", None, Some(START), None, None)
            .unwrap();
        sched
            .add_schedule("/b", "2m", None, Some(START), None, None)
            .unwrap();

        let mut fired = Vec::new();
        for _ in 0..10 {
            let wakeup = sched.next_wakeup(&cephfs()).unwrap();
            fired.push((wakeup.path.clone(), wakeup.due_at));
            assert!(sched.fire_at(wakeup.clone(), wakeup.due_at).created());
        }

        let times = |path: &str| -> Vec<DateTime<Utc>> {
            fired.iter().filter(|(p, _)| p == path).map(|(_, t)| *t).collect()
        };
        let (every_minute, every_other) = (times("/a"), times("/b"));
        assert_eq!(every_minute.len(), 7);
        assert_eq!(every_other.len(), 3);
        assert!(every_other.iter().all(|t| every_minute.contains(t)));
        assert!(fired.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(fs.readdir("/b/.snap").unwrap().len(), 3);

        let details = &sched.get_schedule("/b", None).unwrap()[0];
        assert_eq!(details.created_count, 3);
    }

    #[test]
    fn boundary_missed_during_firing_is_due_at_once() {
        let (sched, fs, _) = scheduler();
        fs.add_dir("/a");
        fs.add_dir("/b");
        sched
            .add_schedule("/a", "1h", None, Some(START), None, None)
            .unwrap();
        sched
            .add_schedule("/b", "1h", None, Some("2024-01-01T00:30:00"), None, None)
            .unwrap();

        // /a was due at 01:00 but its firing only finished at 01:45
        let wakeup = Wakeup {
            fs: cephfs(),
            path: "/a".into(),
            interval: Interval::parse("1h").unwrap(),
            start: at(0, 0),
            retention: RetentionPolicy::default(),
            due_at: at(1, 0),
        };
        assert!(sched.fire_at(wakeup, at(1, 45)).created());

        let owed = sched.next_wakeup(&cephfs()).unwrap();
        assert_eq!(owed.path, "/b");
        assert_eq!(owed.due_at, at(1, 30));
        assert!(sched.fire_at(owed.clone(), at(1, 46)).created());

        let next = sched.next_wakeup(&cephfs()).unwrap();
        assert_eq!(next.path, "/a");
        assert_eq!(next.due_at, at(2, 0));
    }

    #[tokio::test]
    async fn owed_firing_runs_without_waiting() {
        let (sched, fs, _) = scheduler();
        let sched = Arc::new(sched);
        fs.add_dir("/a");
        fs.add_dir("/b");
        sched
            .add_schedule("/a", "1h", None, Some(START), None, None)
            .unwrap();
        sched
            .add_schedule("/b", "1h", None, Some(START), None, None)
            .unwrap();
        sched.start();

        // /a takes its turn by hand; /b shares its boundary and must follow
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();
        assert_eq!(wakeup.path, "/a");
        sched.fire_at(wakeup.clone(), wakeup.due_at);

        for _ in 0..200 {
            if sched.get_schedule("/b", None).unwrap()[0].created_count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fs.readdir("/b/.snap").unwrap().len(), 1);

        sched.shutdown();
    }

    #[test]
    fn oversized_interval_is_never_stored() {
        let (sched, _, objects) = scheduler();
        assert!(matches!(
            sched.add_schedule("/vol", "20000000w", None, None, None, None),
            Err(SnapError::Validation(_))
        ));
        assert_eq!(objects.write_count(), 0);
        assert!(sched.list_schedules("/", true, None).unwrap().is_empty());
    }

    #[test]
    fn unrecorded_snapshot_keeps_schedule_armed() {
        let (sched, fs, objects) = scheduler();
        fs.add_dir("/vol");
        sched
            .add_schedule("/vol", "1h", None, Some(START), None, None)
            .unwrap();
        *objects.fail_write.lock().unwrap() = true;

        let wakeup = due(sched.next_wakeup(&cephfs()).unwrap(), at(1, 0));
        assert!(sched.fire_at(wakeup, at(1, 0)).created());
        assert_eq!(sched.next_wakeup(&cephfs()).unwrap().due_at, at(2, 0));

        *objects.fail_write.lock().unwrap() = false;
        assert_eq!(sched.get_schedule("/vol", None).unwrap()[0].created_count, 0);
    }

    #[test]
    fn missing_path_is_deactivated() {
        let (sched, fs, _) = scheduler();
        sched
            .add_schedule("/gone", "1h", None, Some(START), None, None)
            .unwrap();
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();

        // A success in between resets the count
        assert!(!sched.fire_at(wakeup.clone(), at(1, 0)).created());
        assert!(!sched.fire_at(wakeup.clone(), at(2, 0)).created());
        fs.add_dir("/gone");
        assert!(sched.fire_at(wakeup.clone(), at(3, 0)).created());
        fs.remove_tree("/gone");

        assert!(!sched.fire_at(wakeup.clone(), at(4, 0)).deactivated);
        assert!(!sched.fire_at(wakeup.clone(), at(5, 0)).deactivated);
        let report = sched.fire_at(wakeup, at(6, 0));
        assert!(report.deactivated);

        assert!(!sched.get_schedule("/gone", None).unwrap()[0].active);
        assert!(sched.next_wakeup(&cephfs()).is_none());
    }

    #[test]
    fn failure_policy_can_be_disabled() {
        let (sched, _, _) = scheduler_with(SchedulerSettings {
            max_consecutive_failures: 0,
            ..SchedulerSettings::default()
        });
        sched
            .add_schedule("/gone", "1h", None, Some(START), None, None)
            .unwrap();
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();

        for hour in 1..=5 {
            assert!(!sched.fire_at(wakeup.clone(), at(hour, 0)).deactivated);
        }
        assert!(sched.get_schedule("/gone", None).unwrap()[0].active);
    }

    #[test]
    fn other_errors_never_deactivate() {
        let (sched, fs, _) = scheduler();
        fs.add_dir("/vol");
        *fs.fail_mkdir.lock().unwrap() = Some(FsError::Unavailable("mds".into()));
        sched
            .add_schedule("/vol", "1h", None, Some(START), None, None)
            .unwrap();
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();

        for hour in 1..=5 {
            let report = sched.fire_at(wakeup.clone(), at(hour, 0));
            assert!(!report.created());
            assert!(!report.deactivated);
        }
        assert!(sched.next_wakeup(&cephfs()).is_some());
    }

    #[test]
    fn corrupt_database_fails_every_access() {
        let (sched, _, objects) = scheduler();
        objects.put(DB_OBJECT_NAME, "this is not sql");

        for _ in 0..2 {
            assert!(matches!(
                sched.list_schedules("/", true, None),
                Err(SnapError::FatalCorruption { .. })
            ));
        }
        assert!(sched.status().unwrap().is_empty());
        assert_eq!(sched.load_all(), 0);
    }

    #[test]
    fn storage_failure_leaves_no_rule() {
        let (sched, _, objects) = scheduler();
        *objects.fail_write.lock().unwrap() = true;

        assert!(matches!(
            sched.add_schedule("/vol", "1h", None, None, None, None),
            Err(SnapError::StorageUnavailable(_))
        ));
        assert!(sched.list_schedules("/", true, None).unwrap().is_empty());
        assert!(sched.next_wakeup(&cephfs()).is_none());
    }

    #[test]
    fn schedules_resume_after_restart() {
        let fs = Arc::new(MockFs::new());
        let objects = Arc::new(MemoryObjectStore::new());
        let connect = || {
            Arc::new(MockConnector::new().with_fs("cephfs", fs.clone(), objects.clone()))
        };

        let first = SnapScheduler::new(connect(), SchedulerSettings::default());
        first
            .add_schedule("/vol", "1d", Some("7d"), Some(START), None, None)
            .unwrap();
        drop(first);

        let second = SnapScheduler::new(connect(), SchedulerSettings::default());
        assert_eq!(second.load_all(), 1);
        assert_eq!(second.list_schedules("/", true, None).unwrap().len(), 1);
        assert_eq!(second.next_wakeup(&cephfs()).unwrap().path, "/vol");
    }

    #[test]
    fn status_reports_next_snapshot() {
        let (sched, _, _) = scheduler();
        sched
            .add_schedule("/vol", "1h", None, Some(START), None, None)
            .unwrap();

        let status = sched.status().unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].fs, cephfs());
        assert_eq!(status[0].active_paths, 1);
        let next = status[0].next.as_ref().unwrap();
        assert_eq!(next.path, "/vol");
        assert_eq!(next.schedule.to_string(), "1h");
    }

    #[test]
    fn filesystems_are_independent() {
        let other_fs = Arc::new(MockFs::new().with_virtual_dir("_snaps"));
        let connector = MockConnector::new()
            .with_fs("cephfs", Arc::new(MockFs::new()), Arc::new(MemoryObjectStore::new()))
            .with_fs("backup", other_fs.clone(), Arc::new(MemoryObjectStore::new()));
        let sched = SnapScheduler::new(
            Arc::new(connector),
            SchedulerSettings {
                snapshot_dir: "_snaps".into(),
                ..SchedulerSettings::default()
            },
        );
        let backup = FsName::new("backup");
        other_fs.add_dir("/vol");

        sched
            .add_schedule("/vol", "1h", None, Some(START), Some(backup.clone()), None)
            .unwrap();
        assert!(sched.list_schedules("/", true, None).unwrap().is_empty());
        assert!(sched.next_wakeup(&cephfs()).is_none());

        let wakeup = sched.next_wakeup(&backup).unwrap();
        assert!(sched.fire_at(wakeup, at(1, 0)).created());
        assert_eq!(other_fs.readdir("/vol/_snaps").unwrap().len(), 1);

        let status = sched.status().unwrap();
        assert_eq!(
            status.iter().map(|s| s.fs.as_str()).collect::<Vec<_>>(),
            vec!["backup", "cephfs"]
        );
    }

    #[tokio::test]
    async fn expired_deadline_takes_snapshot() {
        let (sched, fs, _) = scheduler();
        let sched = Arc::new(sched);
        fs.add_dir("/vol");
        sched
            .add_schedule("/vol", "1h", None, Some(START), None, None)
            .unwrap();
        sched.start();

        // Pull the armed deadline in so the test does not wait an hour
        let wakeup = sched.next_wakeup(&cephfs()).unwrap();
        sched.timer.arm(wakeup, Duration::from_millis(10));

        // The count is recorded under the same lock that re-arms the timer
        for _ in 0..200 {
            if sched.get_schedule("/vol", None).unwrap()[0].created_count > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let taken = fs.readdir("/vol/.snap").unwrap();
        assert_eq!(taken.len(), 1);
        assert!(taken[0].starts_with("scheduled-"));
        assert_eq!(sched.next_wakeup(&cephfs()).unwrap().path, "/vol");

        sched.shutdown();
        assert!(sched.next_wakeup(&cephfs()).is_none());
    }
}
