//! Timer engine
//!
//! Keeps at most one armed deadline per filesystem: the rule that is due
//! soonest. All deadlines live in one min-heap driven by a single worker
//! task. Re-arming or cancelling a filesystem cancels the token of its
//! previous deadline; the worker drops cancelled entries when they surface.

use chrono::{DateTime, Utc};
use snapsched_api::{Interval, RetentionPolicy};
use snapsched_store::ActiveRule;
use snapsched_util::FsName;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A rule due to fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wakeup {
    pub fs: FsName,
    pub path: String,
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub retention: RetentionPolicy,
    pub due_at: DateTime<Utc>,
}

/// Time from `now` until the next firing of a rule anchored at `start`.
///
/// Firings happen at `start + k * repeat` for every integer `k`, so the
/// wait lies in `(0, repeat]` whether the anchor is in the past or the
/// future. At an exact firing instant the wait is a full interval.
pub fn compute_wait(now: DateTime<Utc>, start: DateTime<Utc>, repeat: Duration) -> Duration {
    let repeat_ms = (repeat.as_millis() as i64).max(1);
    let elapsed_ms = (now - start).num_milliseconds();
    let wait_ms = repeat_ms - elapsed_ms.rem_euclid(repeat_ms);
    Duration::from_millis(wait_ms as u64)
}

/// Identity of a rule for firing bookkeeping
pub type RuleKey = (String, Interval, DateTime<Utc>);

/// The boundary each rule last fired for, successful or not
pub type FiredBoundaries = HashMap<RuleKey, DateTime<Utc>>;

/// Boundaries passed while a firing ran
///
/// A rule whose latest boundary lies at or after `since` and that has not
/// fired for it yet is owed a firing and waits zero.
pub struct Owed<'a> {
    pub since: DateTime<Utc>,
    pub fired: &'a FiredBoundaries,
}

pub fn rule_key(path: &str, interval: Interval, start: DateTime<Utc>) -> RuleKey {
    (path.to_string(), interval, start)
}

/// Latest firing instant of a rule at or before `now`
fn latest_boundary(now: DateTime<Utc>, start: DateTime<Utc>, repeat_ms: i64) -> Option<DateTime<Utc>> {
    let periods = (now - start).num_milliseconds().div_euclid(repeat_ms);
    start.checked_add_signed(chrono::Duration::milliseconds(periods.checked_mul(repeat_ms)?))
}

/// The rule of `rules` due soonest, with its wait.
///
/// Ties go to the lexically smaller path, then the shorter interval. Rules
/// whose next firing falls outside the representable date range are
/// skipped.
pub fn next_wakeup(
    fs: &FsName,
    rules: &[ActiveRule],
    now: DateTime<Utc>,
    owed: Option<&Owed<'_>>,
) -> Option<(Wakeup, Duration)> {
    let due = |rule: &ActiveRule| -> Option<(DateTime<Utc>, Duration)> {
        let repeat = rule.interval.as_duration();
        let repeat_ms = (repeat.as_millis() as i64).max(1);
        let boundary = latest_boundary(now, rule.start, repeat_ms)?;

        if let Some(owed) = owed {
            let key = rule_key(&rule.path, rule.interval, rule.start);
            let fired = owed.fired.get(&key).is_some_and(|fired| *fired >= boundary);
            if boundary >= owed.since && !fired {
                return Some((boundary, Duration::ZERO));
            }
        }

        let due_at = boundary.checked_add_signed(chrono::Duration::milliseconds(repeat_ms));
        if due_at.is_none() {
            warn!(fs = %fs, path = %rule.path, schedule = %rule.interval, "Next firing out of range, rule skipped");
        }
        Some((due_at?, compute_wait(now, rule.start, repeat)))
    };

    let (rule, (due_at, wait)) = rules
        .iter()
        .filter_map(|rule| due(rule).map(|due| (rule, due)))
        .min_by(|(a, (_, wait_a)), (b, (_, wait_b))| {
            wait_a
                .cmp(wait_b)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.interval.as_secs().cmp(&b.interval.as_secs()))
        })?;

    let wakeup = Wakeup {
        fs: fs.clone(),
        path: rule.path.clone(),
        interval: rule.interval,
        start: rule.start,
        retention: rule.retention.clone(),
        due_at,
    };
    Some((wakeup, wait))
}

struct Armed {
    seq: u64,
    token: CancellationToken,
    wakeup: Wakeup,
}

struct Pending {
    due: Instant,
    seq: u64,
    token: CancellationToken,
    fs: FsName,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    next_seq: u64,
    armed: HashMap<FsName, Armed>,
}

/// One deadline per filesystem over a shared worker
pub struct TimerEngine {
    state: Arc<Mutex<TimerState>>,
    commands: mpsc::UnboundedSender<Pending>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Pending>>>,
    shutdown: CancellationToken,
}

impl TimerEngine {
    /// Create a timer engine. Deadlines may be armed right away; they fire
    /// once [`TimerEngine::spawn`] has started the worker.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            commands: tx,
            receiver: Mutex::new(Some(rx)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the worker, delivering due wakeups on `fire_tx`.
    ///
    /// Returns `None` when the worker was already started.
    pub fn spawn(&self, fire_tx: mpsc::UnboundedSender<Wakeup>) -> Option<JoinHandle<()>> {
        let rx = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let worker = Worker {
            state: self.state.clone(),
            commands: rx,
            shutdown: self.shutdown.clone(),
            fire_tx,
            heap: BinaryHeap::new(),
        };
        Some(tokio::spawn(worker.run()))
    }

    /// Arm `wakeup` to fire after `wait`, replacing the filesystem's
    /// previous deadline.
    pub fn arm(&self, wakeup: Wakeup, wait: Duration) {
        let mut state = self.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        let token = CancellationToken::new();
        let fs = wakeup.fs.clone();

        debug!(
            fs = %fs,
            path = %wakeup.path,
            schedule = %wakeup.interval,
            due_at = %wakeup.due_at,
            wait_ms = wait.as_millis() as u64,
            "Deadline armed"
        );

        let previous = state.armed.insert(
            fs.clone(),
            Armed {
                seq,
                token: token.clone(),
                wakeup,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        // The receiver only goes away with the worker at shutdown
        let _ = self.commands.send(Pending {
            due: Instant::now() + wait,
            seq,
            token,
            fs,
        });
    }

    /// Drop the filesystem's deadline, if any.
    pub fn cancel(&self, fs: &FsName) {
        if let Some(previous) = self.lock().armed.remove(fs) {
            previous.token.cancel();
            debug!(fs = %fs, "Deadline cancelled");
        }
    }

    /// The wakeup currently armed for a filesystem
    pub fn next_wakeup(&self, fs: &FsName) -> Option<Wakeup> {
        self.lock().armed.get(fs).map(|armed| armed.wakeup.clone())
    }

    /// Cancel every deadline and stop the worker.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        for (_, armed) in state.armed.drain() {
            armed.token.cancel();
        }
        self.shutdown.cancel();
        info!("Timer engine stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct Worker {
    state: Arc<Mutex<TimerState>>,
    commands: mpsc::UnboundedReceiver<Pending>,
    shutdown: CancellationToken,
    fire_tx: mpsc::UnboundedSender<Wakeup>,
    heap: BinaryHeap<Reverse<Pending>>,
}

impl Worker {
    async fn run(mut self) {
        debug!("Timer worker started");

        loop {
            let next_due = self.heap.peek().map(|Reverse(p)| p.due);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(pending) => self.push(pending),
                    None => break,
                },
                _ = sleep_until(next_due) => {
                    if !self.fire_due() {
                        break;
                    }
                }
            }
        }

        debug!("Timer worker exited");
    }

    fn push(&mut self, pending: Pending) {
        self.heap.push(Reverse(pending));

        let live = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .armed
            .len();
        if self.heap.len() > 2 * live + 16 {
            self.heap.retain(|Reverse(p)| !p.token.is_cancelled());
        }
    }

    /// Deliver every due deadline. Returns false once nobody listens.
    fn fire_due(&mut self) -> bool {
        let now = Instant::now();

        while let Some(Reverse(pending)) = self.heap.peek() {
            if pending.due > now {
                break;
            }
            let Some(Reverse(pending)) = self.heap.pop() else {
                break;
            };
            if pending.token.is_cancelled() {
                continue;
            }

            let wakeup = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                match state.armed.get(&pending.fs) {
                    Some(armed) if armed.seq == pending.seq => {
                        state.armed.remove(&pending.fs).map(|armed| armed.wakeup)
                    }
                    _ => None,
                }
            };

            if let Some(wakeup) = wakeup {
                debug!(fs = %wakeup.fs, path = %wakeup.path, "Deadline expired");
                if self.fire_tx.send(wakeup).is_err() {
                    return false;
                }
            }
        }

        true
    }
}

async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}
