//! Platform abstraction.
//!
//! A [`Platform`] builds run loops and their sources. The only
//! platform-specific piece is the [`Poller`] each run loop blocks on: it
//! sleeps until woken, until a timeout, or until a watched handle is ready.
//! [`PortablePlatform`] uses a condition variable and supports no notifier
//! modes; the `mk-posix` crate provides a `poll(2)` based one.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{Error, Result};
use crate::run_loop::{RunLoop, RunLoopConfig, RunLoopKind};
use crate::source::{EventSource, IoHandle, NotifierModes, NotifierSource, TimerSource};

/// Blocking primitive behind a run loop.
pub trait Poller: Send + Sync {
    /// Modes [`Poller::register`] accepts.
    fn supported_modes(&self) -> NotifierModes;

    /// Starts (or updates) watching `handle` for `modes`.
    fn register(&self, handle: IoHandle, modes: NotifierModes) -> Result<()>;

    fn unregister(&self, handle: IoHandle);

    /// Blocks until [`Poller::wake`] is called, a watched handle is ready or
    /// `timeout` elapses. A wake issued while not waiting makes the next wait
    /// return immediately.
    fn wait(&self, timeout: Option<Duration>);

    fn wake(&self);

    /// Checks watched handles without blocking and without consuming wakes.
    fn poll_ready(&self) {}

    fn has_ready(&self) -> bool {
        false
    }

    /// Drains readiness collected by the last wait or poll.
    fn take_ready(&self) -> Vec<(IoHandle, NotifierModes)> {
        Vec::new()
    }
}

/// Condition-variable poller without handle support.
#[derive(Default)]
pub struct CondvarPoller {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl CondvarPoller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Poller for CondvarPoller {
    fn supported_modes(&self) -> NotifierModes {
        NotifierModes::empty()
    }

    fn register(&self, _handle: IoHandle, modes: NotifierModes) -> Result<()> {
        Err(Error::UnsupportedNotifierModes {
            requested: modes,
            supported: NotifierModes::empty(),
        })
    }

    fn unregister(&self, _handle: IoHandle) {}

    fn wait(&self, timeout: Option<Duration>) {
        let mut woken = self.woken.lock();
        if !*woken {
            match timeout {
                Some(timeout) => {
                    self.condvar.wait_for(&mut woken, timeout);
                }
                None => self.condvar.wait(&mut woken),
            }
        }
        *woken = false;
    }

    fn wake(&self) {
        *self.woken.lock() = true;
        self.condvar.notify_one();
    }
}

/// Factory for run loops and their sources.
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    fn create_poller(&self) -> Arc<dyn Poller>;

    fn supported_notifier_modes(&self) -> NotifierModes {
        NotifierModes::empty()
    }

    fn create_event_source(&self, name: &str) -> Arc<EventSource> {
        EventSource::new(name)
    }

    fn create_timer_source(&self, name: &str) -> Arc<TimerSource> {
        TimerSource::new(name)
    }

    fn create_notifier_source(&self, name: &str, poller: Arc<dyn Poller>) -> Arc<NotifierSource> {
        NotifierSource::new(name, poller)
    }

    fn create_run_loop_with(&self, config: RunLoopConfig) -> Arc<RunLoop> {
        let poller = self.create_poller();
        RunLoop::assemble(
            config,
            Arc::clone(&poller),
            self.create_event_source("events"),
            self.create_timer_source("timers"),
            self.create_notifier_source("notifiers", poller),
        )
    }

    fn create_run_loop(&self, is_main: bool) -> Arc<RunLoop> {
        let kind = if is_main {
            RunLoopKind::Main
        } else {
            RunLoopKind::Worker
        };
        self.create_run_loop_with(RunLoopConfig::for_kind(kind))
    }

    /// Run loop driven by a foreign host loop.
    fn create_run_loop_hook(&self) -> Arc<RunLoop> {
        self.create_run_loop_with(RunLoopConfig::for_kind(RunLoopKind::Hook))
    }
}

/// Platform usable everywhere; timers and events only.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortablePlatform;

impl Platform for PortablePlatform {
    fn name(&self) -> &str {
        "portable"
    }

    fn create_poller(&self) -> Arc<dyn Poller> {
        Arc::new(CondvarPoller::new())
    }
}

impl fmt::Debug for dyn Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Platform({})", self.name())
    }
}

static PLATFORM: RwLock<Option<Arc<dyn Platform>>> = parking_lot::const_rwlock(None);

/// Selects the platform used for run loops created from now on.
pub fn install(platform: Arc<dyn Platform>) {
    log::debug!("installing platform {}", platform.name());
    *PLATFORM.write() = Some(platform);
}

/// The installed platform, defaulting to [`PortablePlatform`].
pub fn current() -> Arc<dyn Platform> {
    if let Some(platform) = PLATFORM.read().as_ref() {
        return Arc::clone(platform);
    }
    let mut slot = PLATFORM.write();
    Arc::clone(slot.get_or_insert_with(|| Arc::new(PortablePlatform) as Arc<dyn Platform>))
}
