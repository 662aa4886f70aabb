//! Per-thread run loop.
//!
//! A run loop repeatedly prepares its sources, dispatches the ready ones
//! and, when nothing is ready, blocks on its platform poller until the
//! nearest timer deadline or a wake-up. Idle tasks run only on passes where
//! no other source had work.
//!
//! A hook loop ([`RunLoopKind::Hook`]) never blocks: a foreign host loop
//! calls [`RunLoop::execute`] whenever it has time and reports its own
//! shutdown through [`RunLoop::host_exited`].

use core::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::platform::{self, Poller};
use crate::source::{
    EventSource, IdleSource, IdleStatus, NotifierSource, Readiness, Source, TimerSource, IDLE_SOURCE,
};
use crate::thread::ThreadData;

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecuteFlags: u8 {
        /// Run one non-blocking pass and return.
        const SINGLE_PASS = 0b0001;
    }
}

/// How [`RunLoop::execute`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStatus {
    /// The loop observed a quit request and finished.
    Exited,
    /// The loop returned control without quitting.
    Yielded,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunLoopKind {
    Main,
    #[default]
    Worker,
    Hook,
}

/// Configuration for a run loop.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    pub name: String,
    pub kind: RunLoopKind,
    /// Idle tasks run per idle pass.
    pub idle_batch: usize,
    /// Upper bound for a single blocking wait.
    pub max_wait: Option<Duration>,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            name: "worker".into(),
            kind: RunLoopKind::Worker,
            idle_batch: 16,
            max_wait: None,
        }
    }
}

impl RunLoopConfig {
    pub fn builder() -> RunLoopConfigBuilder {
        RunLoopConfigBuilder::default()
    }

    /// Defaults for `kind`, named after it.
    pub fn for_kind(kind: RunLoopKind) -> Self {
        let name = match kind {
            RunLoopKind::Main => "main",
            RunLoopKind::Worker => "worker",
            RunLoopKind::Hook => "hook",
        };
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }
}

/// Builder for [`RunLoopConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunLoopConfigBuilder {
    config: RunLoopConfig,
}

impl RunLoopConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn kind(mut self, kind: RunLoopKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn idle_batch(mut self, batch: usize) -> Self {
        self.config.idle_batch = batch;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = Some(max_wait);
        self
    }

    pub fn build(self) -> RunLoopConfig {
        self.config
    }
}

type DownCallback = Box<dyn FnOnce() + Send>;

/// Multiplexes the sources of one thread.
pub struct RunLoop {
    config: RunLoopConfig,
    poller: Arc<dyn Poller>,
    event_source: Arc<EventSource>,
    timer_source: Arc<TimerSource>,
    notifier_source: Arc<NotifierSource>,
    idle_source: Arc<IdleSource>,
    sources: RwLock<Vec<Arc<dyn Source>>>,
    running: AtomicBool,
    exiting: AtomicBool,
    passes: AtomicU64,
    down: Mutex<Option<DownCallback>>,
}

impl RunLoop {
    /// Wires the default sources into a new run loop.
    pub fn assemble(
        config: RunLoopConfig,
        poller: Arc<dyn Poller>,
        event_source: Arc<EventSource>,
        timer_source: Arc<TimerSource>,
        notifier_source: Arc<NotifierSource>,
    ) -> Arc<Self> {
        let idle_source = IdleSource::new("idle", config.idle_batch);
        let sources: Vec<Arc<dyn Source>> = vec![
            Arc::clone(&event_source) as Arc<dyn Source>,
            Arc::clone(&timer_source) as Arc<dyn Source>,
            Arc::clone(&notifier_source) as Arc<dyn Source>,
            Arc::clone(&idle_source) as Arc<dyn Source>,
        ];
        let run_loop = Arc::new(Self {
            config,
            poller,
            event_source,
            timer_source,
            notifier_source,
            idle_source,
            sources: RwLock::new(sources),
            running: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            down: Mutex::new(None),
        });
        for source in run_loop.sources.read().iter() {
            source.attach(&run_loop);
        }
        log::debug!("run loop {} created ({:?})", run_loop.config.name, run_loop.config.kind);
        run_loop
    }

    /// Run loop from the installed platform.
    pub fn new(config: RunLoopConfig) -> Arc<Self> {
        platform::current().create_run_loop_with(config)
    }

    pub fn create(is_main: bool) -> Arc<Self> {
        platform::current().create_run_loop(is_main)
    }

    pub fn create_hook() -> Arc<Self> {
        platform::current().create_run_loop_hook()
    }

    /// Run loop of the calling thread.
    pub fn current() -> Arc<Self> {
        Arc::clone(ThreadData::current().run_loop())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> RunLoopKind {
        self.config.kind
    }

    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    pub fn is_hook(&self) -> bool {
        self.config.kind == RunLoopKind::Hook
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    /// Passes run since creation.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn event_source(&self) -> &Arc<EventSource> {
        &self.event_source
    }

    pub fn timer_source(&self) -> &Arc<TimerSource> {
        &self.timer_source
    }

    pub fn notifier_source(&self) -> &Arc<NotifierSource> {
        &self.notifier_source
    }

    pub fn idle_source(&self) -> &Arc<IdleSource> {
        &self.idle_source
    }

    pub fn source(&self, index: usize) -> Option<Arc<dyn Source>> {
        self.sources.read().get(index).cloned()
    }

    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Appends a user source; returns its slot.
    pub fn add_source(self: &Arc<Self>, source: Arc<dyn Source>) -> usize {
        source.attach(self);
        let index = {
            let mut sources = self.sources.write();
            sources.push(source);
            sources.len() - 1
        };
        self.wake();
        index
    }

    /// Removes the user source in `index`. Default sources cannot be removed.
    pub fn remove_source(&self, index: usize) -> Result<Arc<dyn Source>> {
        if index <= IDLE_SOURCE {
            return Err(Error::InvalidArgument(format!(
                "source slot {index} belongs to a default source"
            )));
        }
        let mut sources = self.sources.write();
        if index >= sources.len() {
            return Err(Error::InvalidArgument(format!("no source in slot {index}")));
        }
        let source = sources.remove(index);
        source.detach();
        Ok(source)
    }

    /// Queues `event` on this loop's event source.
    pub fn post_event(&self, event: Event) -> bool {
        self.event_source.post(event)
    }

    /// Schedules `task` for idle passes until it returns [`IdleStatus::Done`].
    pub fn on_idle<F>(&self, task: F)
    where
        F: FnMut() -> IdleStatus + Send + 'static,
    {
        self.idle_source.push(Box::new(task));
    }

    /// Installs the callback fired once the loop finishes.
    pub fn set_down_callback<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.down.lock() = Some(Box::new(callback));
    }

    /// Interrupts a blocking wait.
    pub fn wake(&self) {
        self.poller.wake();
    }

    /// Asks every source to be prepared again.
    pub fn schedule_sources(&self) {
        let sources = self.sources.read().clone();
        for source in sources {
            source.wake_up();
        }
        self.wake();
    }

    /// Requests the loop to finish. Takes effect at the next check point.
    pub fn quit(&self) {
        if !self.exiting.swap(true, Ordering::AcqRel) {
            log::debug!("run loop {} quitting", self.config.name);
        }
        self.schedule_sources();
    }

    /// True when some source would dispatch on the next pass.
    pub fn has_pending_work(&self) -> bool {
        let now = Instant::now();
        let sources = self.sources.read().clone();
        sources.iter().any(|source| {
            source.is_functional()
                && matches!(source.prepare(now), Readiness::Ready | Readiness::Idle)
        })
    }

    /// Runs one non-blocking pass; returns whether anything was dispatched.
    pub fn process_events(&self) -> Result<bool> {
        self.run_pass(false)
    }

    /// Runs the loop.
    ///
    /// Normal loops block between passes until [`RunLoop::quit`]; with
    /// [`ExecuteFlags::SINGLE_PASS`] they run one non-blocking pass. Hook
    /// loops always run one non-blocking pass. The down callback fires when
    /// the loop finishes.
    pub fn execute(&self, flags: ExecuteFlags) -> Result<ExecuteStatus> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidArgument(format!(
                "run loop {} is already executing",
                self.config.name
            )));
        }
        let single_pass = self.is_hook() || flags.contains(ExecuteFlags::SINGLE_PASS);
        log::trace!("run loop {} executing (single pass: {single_pass})", self.config.name);
        let outcome = loop {
            if self.is_exiting() {
                break Ok(ExecuteStatus::Exited);
            }
            if let Err(err) = self.run_pass(!single_pass) {
                break Err(err);
            }
            if single_pass {
                break Ok(if self.is_exiting() {
                    ExecuteStatus::Exited
                } else {
                    ExecuteStatus::Yielded
                });
            }
        };
        self.running.store(false, Ordering::Release);
        match outcome {
            Ok(ExecuteStatus::Yielded) => {}
            _ => self.finish(),
        }
        outcome
    }

    /// Reports that the host driving a hook loop has stopped.
    pub fn host_exited(&self) {
        self.exiting.store(true, Ordering::Release);
        self.finish();
    }

    fn finish(&self) {
        self.exiting.store(false, Ordering::Release);
        log::debug!("run loop {} finished", self.config.name);
        let down = self.down.lock().take();
        if let Some(down) = down {
            down();
        }
    }

    fn run_pass(&self, block: bool) -> Result<bool> {
        self.passes.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let sources = self.sources.read().clone();
        let mut dispatched = false;
        let mut deadline: Option<Instant> = None;
        let mut idle = Vec::new();
        for source in &sources {
            if self.is_exiting() {
                return Ok(dispatched);
            }
            if !source.is_functional() {
                continue;
            }
            match source.prepare(now) {
                Readiness::Ready => {
                    source.dispatch(self)?;
                    dispatched = true;
                }
                Readiness::Pending(Some(at)) => {
                    deadline = Some(deadline.map_or(at, |current| current.min(at)));
                }
                Readiness::Pending(None) => {}
                Readiness::Idle => idle.push(Arc::clone(source)),
            }
        }
        if dispatched || self.is_exiting() {
            return Ok(dispatched);
        }
        if !idle.is_empty() {
            for source in idle {
                source.dispatch(self)?;
            }
            return Ok(true);
        }
        if block {
            let mut timeout = deadline.map(|at| at.saturating_duration_since(Instant::now()));
            if let Some(max_wait) = self.config.max_wait {
                timeout = Some(timeout.map_or(max_wait, |timeout| timeout.min(max_wait)));
            }
            self.poller.wait(timeout);
        }
        Ok(false)
    }
}

impl fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLoop")
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("running", &self.is_running())
            .field("exiting", &self.is_exiting())
            .field("sources", &self.source_count())
            .finish()
    }
}
