use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::Result;
use crate::id::TimerId;
use crate::run_loop::RunLoop;
use crate::signal::{Connection, Signal};
use crate::source::{Readiness, Source, SourceLink};
use crate::thread::ThreadData;

struct TimerInner {
    interval: Duration,
    single_shot: bool,
    deadline: Option<Instant>,
}

/// Timer state shared between a [`Timer`] handle and its source.
pub(crate) struct TimerRecord {
    id: TimerId,
    inner: Mutex<TimerInner>,
    timeout: Signal<()>,
    fired: AtomicU64,
}

impl TimerRecord {
    fn new(interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            id: TimerId::next(),
            inner: Mutex::new(TimerInner {
                interval,
                single_shot: false,
                deadline: None,
            }),
            timeout: Signal::new(),
            fired: AtomicU64::new(0),
        })
    }

    fn arm(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.deadline = Some(now + inner.interval);
    }

    fn disarm(&self) -> bool {
        self.inner.lock().deadline.take().is_some()
    }

    fn is_armed(&self) -> bool {
        self.inner.lock().deadline.is_some()
    }

    fn deadline(&self) -> Option<Instant> {
        self.inner.lock().deadline
    }

    /// Returns `true` when the record is due at `now`. Single-shot records
    /// disarm; periodic ones move to their next deadline, skipping missed
    /// periods.
    fn poll(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        let Some(deadline) = inner.deadline else {
            return false;
        };
        if deadline > now {
            return false;
        }
        if inner.single_shot {
            inner.deadline = None;
        } else {
            let next = deadline + inner.interval;
            inner.deadline = Some(if next <= now { now + inner.interval } else { next });
        }
        true
    }

    fn fire(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = self.timeout.emit(()) {
            log::warn!("{} timeout slot failed: {err}", self.id);
        }
    }
}

/// Drives the timers registered with one run loop.
pub struct TimerSource {
    name: String,
    records: Mutex<Vec<Arc<TimerRecord>>>,
    link: SourceLink,
}

impl TimerSource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            records: Mutex::new(Vec::new()),
            link: SourceLink::new(),
        })
    }

    fn register(&self, record: Arc<TimerRecord>) {
        {
            let mut records = self.records.lock();
            if !records.iter().any(|entry| entry.id == record.id) {
                records.push(record);
            }
        }
        self.link.wake();
    }

    fn unregister(&self, id: TimerId) {
        self.records.lock().retain(|entry| entry.id != id);
    }

    /// Number of armed timers.
    pub fn active_count(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.is_armed())
            .count()
    }

    /// Earliest deadline among armed timers.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.records
            .lock()
            .iter()
            .filter_map(|record| record.deadline())
            .min()
    }
}

impl Source for TimerSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn attach(&self, run_loop: &Arc<RunLoop>) {
        self.link.attach(run_loop);
    }

    fn detach(&self) {
        self.link.detach();
    }

    fn wake_up(&self) {
        self.link.wake();
    }

    fn prepare(&self, now: Instant) -> Readiness {
        let mut records = self.records.lock();
        records.retain(|record| record.is_armed());
        match records.iter().filter_map(|record| record.deadline()).min() {
            Some(deadline) if deadline <= now => Readiness::Ready,
            next => Readiness::Pending(next),
        }
    }

    /// Fires every due timer in deadline order, outside the records lock.
    fn dispatch(&self, _run_loop: &RunLoop) -> Result<()> {
        let now = Instant::now();
        let mut due: Vec<(Instant, Arc<TimerRecord>)> = self
            .records
            .lock()
            .iter()
            .filter_map(|record| {
                record
                    .deadline()
                    .filter(|deadline| *deadline <= now)
                    .map(|deadline| (deadline, Arc::clone(record)))
            })
            .collect();
        due.sort_by_key(|(deadline, _)| *deadline);
        for (_, record) in due {
            if record.poll(now) {
                record.fire();
            }
        }
        Ok(())
    }
}

/// Interval or single-shot timer emitting [`Timer::timeout`] from its run
/// loop. Dropping the handle stops the timer.
pub struct Timer {
    record: Arc<TimerRecord>,
    source: Weak<TimerSource>,
}

impl Timer {
    /// Timer on the calling thread's run loop.
    pub fn new(interval: Duration) -> Self {
        Self::with_run_loop(ThreadData::current().run_loop(), interval)
    }

    pub fn with_run_loop(run_loop: &Arc<RunLoop>, interval: Duration) -> Self {
        Self {
            record: TimerRecord::new(interval),
            source: Arc::downgrade(run_loop.timer_source()),
        }
    }

    /// Calls `slot` once after `interval` on `run_loop`, without a handle.
    pub fn single_shot<F>(run_loop: &Arc<RunLoop>, interval: Duration, slot: F) -> Result<Connection>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let record = TimerRecord::new(interval);
        record.inner.lock().single_shot = true;
        let connection = record.timeout.connect(slot)?;
        record.arm(Instant::now());
        run_loop.timer_source().register(record);
        Ok(connection)
    }

    pub fn id(&self) -> TimerId {
        self.record.id
    }

    pub fn timeout(&self) -> &Signal<()> {
        &self.record.timeout
    }

    pub fn interval(&self) -> Duration {
        self.record.inner.lock().interval
    }

    /// Changes the interval; a running timer restarts with it.
    pub fn set_interval(&self, interval: Duration) {
        self.record.inner.lock().interval = interval;
        if self.is_running() {
            self.start();
        }
    }

    pub fn is_single_shot(&self) -> bool {
        self.record.inner.lock().single_shot
    }

    pub fn set_single_shot(&self, single_shot: bool) {
        self.record.inner.lock().single_shot = single_shot;
    }

    pub fn is_running(&self) -> bool {
        self.record.is_armed()
    }

    /// Time left before the next timeout.
    pub fn remaining(&self) -> Option<Duration> {
        self.record
            .deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Times the timer has fired.
    pub fn fired_count(&self) -> u64 {
        self.record.fired.load(Ordering::Relaxed)
    }

    /// (Re)starts the timer from now.
    pub fn start(&self) {
        self.record.arm(Instant::now());
        match self.source.upgrade() {
            Some(source) => source.register(Arc::clone(&self.record)),
            None => {
                self.record.disarm();
                log::warn!("{} started after its run loop was dropped", self.record.id);
            }
        }
    }

    pub fn start_with(&self, interval: Duration) {
        self.record.inner.lock().interval = interval;
        self.start();
    }

    pub fn stop(&self) {
        self.record.disarm();
        if let Some(source) = self.source.upgrade() {
            source.unregister(self.record.id);
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.record.id)
            .field("interval", &self.interval())
            .field("single_shot", &self.is_single_shot())
            .field("running", &self.is_running())
            .finish()
    }
}
