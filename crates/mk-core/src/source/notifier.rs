use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::id::NotifierId;
use crate::platform::Poller;
use crate::run_loop::RunLoop;
use crate::signal::Signal;
use crate::source::{Readiness, Source, SourceLink};
use crate::thread::ThreadData;

bitflags::bitflags! {
    /// Readiness conditions a notifier can watch.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifierModes: u8 {
        const READ      = 0b0001;
        const WRITE     = 0b0010;
        const ERROR     = 0b0100;
        const EXCEPTION = 0b1000;
    }
}

/// OS-level handle watched by a notifier (a file descriptor on POSIX).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IoHandle(pub i64);

#[cfg(unix)]
impl From<std::os::fd::RawFd> for IoHandle {
    fn from(fd: std::os::fd::RawFd) -> Self {
        Self(i64::from(fd))
    }
}

pub(crate) struct NotifierRecord {
    id: NotifierId,
    handle: IoHandle,
    modes: NotifierModes,
    enabled: AtomicBool,
    activated: Signal<(NotifierModes,)>,
}

/// Dispatches I/O readiness reported by the platform poller.
pub struct NotifierSource {
    name: String,
    poller: Arc<dyn Poller>,
    records: Mutex<Vec<Arc<NotifierRecord>>>,
    link: SourceLink,
}

impl NotifierSource {
    pub fn new(name: &str, poller: Arc<dyn Poller>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            poller,
            records: Mutex::new(Vec::new()),
            link: SourceLink::new(),
        })
    }

    pub fn supported_modes(&self) -> NotifierModes {
        self.poller.supported_modes()
    }

    pub fn poller(&self) -> &Arc<dyn Poller> {
        &self.poller
    }

    /// Enabled notifiers.
    pub fn active_count(&self) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.enabled.load(Ordering::Acquire))
            .count()
    }

    fn register(&self, record: &Arc<NotifierRecord>) -> Result<()> {
        let mut records = self.records.lock();
        if records.iter().any(|entry| entry.id == record.id) {
            return Ok(());
        }
        let watched = Self::watched_modes(&records, record.handle) | record.modes;
        self.poller.register(record.handle, watched)?;
        records.push(Arc::clone(record));
        drop(records);
        self.link.wake();
        Ok(())
    }

    fn unregister(&self, id: NotifierId) {
        let mut records = self.records.lock();
        let Some(idx) = records.iter().position(|entry| entry.id == id) else {
            return;
        };
        let handle = records.remove(idx).handle;
        let remaining = Self::watched_modes(&records, handle);
        if remaining.is_empty() {
            self.poller.unregister(handle);
        } else if let Err(err) = self.poller.register(handle, remaining) {
            log::warn!("re-registering handle {handle:?} failed: {err}");
        }
    }

    fn watched_modes(records: &[Arc<NotifierRecord>], handle: IoHandle) -> NotifierModes {
        records
            .iter()
            .filter(|entry| entry.handle == handle)
            .fold(NotifierModes::empty(), |modes, entry| modes | entry.modes)
    }
}

impl Source for NotifierSource {
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

    fn is_functional(&self) -> bool {
        !self.poller.supported_modes().is_empty()
    }

    fn prepare(&self, _now: Instant) -> Readiness {
        if self.records.lock().is_empty() {
            return Readiness::Pending(None);
        }
        self.poller.poll_ready();
        if self.poller.has_ready() {
            Readiness::Ready
        } else {
            Readiness::Pending(None)
        }
    }

    fn dispatch(&self, _run_loop: &RunLoop) -> Result<()> {
        let ready = self.poller.take_ready();
        let records = self.records.lock().clone();
        for (handle, modes) in ready {
            for record in records.iter().filter(|record| record.handle == handle) {
                let fired = modes & record.modes;
                if fired.is_empty() || !record.enabled.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(err) = record.activated.emit((fired,)) {
                    log::warn!("{} slot failed: {err}", record.id);
                }
            }
        }
        Ok(())
    }
}

/// Watches an [`IoHandle`] and emits [`Notifier::activated`] from its run
/// loop when the handle becomes ready. Dropping the notifier stops watching.
pub struct Notifier {
    record: Arc<NotifierRecord>,
    source: Weak<NotifierSource>,
}

impl Notifier {
    /// Notifier on the calling thread's run loop.
    pub fn new(handle: IoHandle, modes: NotifierModes) -> Result<Self> {
        Self::with_run_loop(ThreadData::current().run_loop(), handle, modes)
    }

    /// Registers `handle` with `run_loop`. Requested modes the platform
    /// cannot watch are dropped with a warning; none left is an error.
    pub fn with_run_loop(run_loop: &Arc<RunLoop>, handle: IoHandle, modes: NotifierModes) -> Result<Self> {
        let source = run_loop.notifier_source();
        let supported = source.supported_modes();
        let masked = modes & supported;
        if masked.is_empty() {
            return Err(Error::UnsupportedNotifierModes {
                requested: modes,
                supported,
            });
        }
        if masked != modes {
            log::warn!("notifier modes {:?} unsupported, watching {masked:?}", modes - masked);
        }
        let record = Arc::new(NotifierRecord {
            id: NotifierId::next(),
            handle,
            modes: masked,
            enabled: AtomicBool::new(true),
            activated: Signal::new(),
        });
        source.register(&record)?;
        Ok(Self {
            record,
            source: Arc::downgrade(source),
        })
    }

    pub fn id(&self) -> NotifierId {
        self.record.id
    }

    pub fn handle(&self) -> IoHandle {
        self.record.handle
    }

    /// Modes actually watched.
    pub fn modes(&self) -> NotifierModes {
        self.record.modes
    }

    pub fn activated(&self) -> &Signal<(NotifierModes,)> {
        &self.record.activated
    }

    pub fn is_enabled(&self) -> bool {
        self.record.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables notifications without unregistering the handle.
    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let previous = self.record.enabled.swap(enabled, Ordering::AcqRel);
        let Some(source) = self.source.upgrade() else {
            return Ok(());
        };
        match (previous, enabled) {
            (false, true) => source.register(&self.record),
            (true, false) => {
                source.unregister(self.record.id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source.unregister(self.record.id);
        }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("id", &self.record.id)
            .field("handle", &self.record.handle)
            .field("modes", &self.record.modes)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
