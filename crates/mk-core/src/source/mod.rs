//! Run-loop sources.
//!
//! A run loop polls its sources once per pass: each one reports whether it
//! has work ([`Readiness`]) and, when ready, is dispatched. Every run loop
//! carries four default sources in fixed slots followed by any user
//! sources.
//!
//! ## Module Overview
//!
//! - [`EventSource`]: the thread's priority event queue (slot 0)
//! - [`TimerSource`] and [`Timer`]: interval and single-shot timers (slot 1)
//! - [`NotifierSource`] and [`Notifier`]: I/O readiness (slot 2)
//! - [`IdleSource`]: tasks run when nothing else is pending (slot 3)

mod event;
mod idle;
mod notifier;
mod timer;

use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::Result;
use crate::run_loop::RunLoop;

pub use event::EventSource;
pub use idle::{IdleSource, IdleStatus, IdleTask};
pub use notifier::{IoHandle, Notifier, NotifierModes, NotifierSource};
pub use timer::{Timer, TimerSource};

/// Slot of the event source in every run loop.
pub const EVENT_SOURCE: usize = 0;
pub const TIMER_SOURCE: usize = 1;
pub const NOTIFIER_SOURCE: usize = 2;
pub const IDLE_SOURCE: usize = 3;

/// What a source reports when a pass prepares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Dispatch now.
    Ready,
    /// Nothing to do; wake up again by the given instant, if any.
    Pending(Option<Instant>),
    /// Dispatch only when no other source was ready in this pass.
    Idle,
}

/// A unit of work multiplexed by a [`RunLoop`].
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Called once the source joins `run_loop`.
    fn attach(&self, run_loop: &Arc<RunLoop>);

    fn detach(&self);

    /// Nudges the owning run loop so that the source is prepared again.
    fn wake_up(&self);

    /// Non-functional sources are skipped by every pass.
    fn is_functional(&self) -> bool {
        true
    }

    fn prepare(&self, now: Instant) -> Readiness;

    fn dispatch(&self, run_loop: &RunLoop) -> Result<()>;
}

/// Weak link from a source to its run loop.
#[derive(Default)]
pub struct SourceLink {
    run_loop: Mutex<Weak<RunLoop>>,
}

impl SourceLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, run_loop: &Arc<RunLoop>) {
        *self.run_loop.lock() = Arc::downgrade(run_loop);
    }

    pub fn detach(&self) {
        *self.run_loop.lock() = Weak::new();
    }

    pub fn run_loop(&self) -> Option<Arc<RunLoop>> {
        self.run_loop.lock().upgrade()
    }

    pub fn is_attached(&self) -> bool {
        self.run_loop.lock().strong_count() > 0
    }

    /// Wakes the run loop, if still alive.
    pub fn wake(&self) {
        if let Some(run_loop) = self.run_loop() {
            run_loop.wake();
        }
    }
}
