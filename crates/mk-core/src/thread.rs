//! Threads and thread affinity.
//!
//! Every OS thread that touches the runtime gets a [`ThreadData`]: its
//! identity, its run loop and the registry of threads it started. Threads
//! that were not started through a [`Thread`] are adopted lazily.
//!
//! A [`Thread`] is the interface object controlling one runtime thread.
//! Workers get a fresh OS thread running their loop until [`Thread::exit`];
//! applets bind to the calling thread and are driven by a host loop through
//! a hook run loop.
//!
//! Status transitions: `Inactive -> StartingUp -> Running -> Stopped`.

use core::fmt;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::{Event, EventPayload, EventTarget, TargetRef};
use crate::id::ThreadDataId;
use crate::object::Object;
use crate::platform;
use crate::property::{Property, PropertyWriter};
use crate::run_loop::{ExecuteFlags, RunLoop, RunLoopConfig, RunLoopKind};
use crate::signal::Signal;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadData>>> = const { RefCell::new(None) };
}

/// Ownership record of one runtime thread.
pub struct ThreadData {
    id: ThreadDataId,
    name: String,
    os_thread: Mutex<Option<std::thread::ThreadId>>,
    run_loop: Arc<RunLoop>,
    children: Mutex<Vec<Weak<ThreadShared>>>,
}

impl ThreadData {
    pub fn new(name: &str, run_loop: Arc<RunLoop>) -> Arc<Self> {
        Arc::new(Self {
            id: ThreadDataId::next(),
            name: name.to_owned(),
            os_thread: Mutex::new(None),
            run_loop,
            children: Mutex::new(Vec::new()),
        })
    }

    /// Record of the calling thread, adopting the thread on first use. The
    /// process main thread gets a main run loop, others a worker one.
    pub fn current() -> Arc<Self> {
        if let Some(current) = Self::try_current() {
            return current;
        }
        let os_thread = std::thread::current();
        let is_main = os_thread.name() == Some("main");
        let name = os_thread.name().unwrap_or("adopted").to_owned();
        let data = Self::new(&name, platform::current().create_run_loop(is_main));
        *data.os_thread.lock() = Some(os_thread.id());
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&data)));
        log::debug!("adopted thread {name} as {}", data.id);
        data
    }

    /// Record of the calling thread, without adopting it.
    pub fn try_current() -> Option<Arc<Self>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// True when the calling thread is bound to this record.
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|current| core::ptr::eq(current.as_ref(), self))
        })
    }

    pub(crate) fn bind_current(self: &Arc<Self>) -> Option<Arc<ThreadData>> {
        *self.os_thread.lock() = Some(std::thread::current().id());
        CURRENT.with(|current| current.borrow_mut().replace(Arc::clone(self)))
    }

    pub(crate) fn unbind_current(&self, previous: Option<Arc<ThreadData>>) {
        *self.os_thread.lock() = None;
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }

    pub fn id(&self) -> ThreadDataId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS thread currently bound to this record.
    pub fn os_thread(&self) -> Option<std::thread::ThreadId> {
        *self.os_thread.lock()
    }

    pub fn run_loop(&self) -> &Arc<RunLoop> {
        &self.run_loop
    }

    /// Queues `event` on this thread's run loop.
    pub fn post_event(&self, event: Event) -> bool {
        self.run_loop.post_event(event)
    }

    fn register_child(&self, child: &Arc<ThreadShared>) {
        let mut children = self.children.lock();
        children.retain(|entry| entry.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    fn children(&self) -> Vec<Arc<ThreadShared>> {
        self.children.lock().iter().filter_map(Weak::upgrade).collect()
    }

    /// Threads started from this thread that are still alive.
    pub fn child_count(&self) -> usize {
        self.children.lock().iter().filter(|entry| entry.strong_count() > 0).count()
    }
}

impl fmt::Debug for ThreadData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("os_thread", &self.os_thread())
            .finish()
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadStatus {
    #[default]
    Inactive,
    StartingUp,
    Running,
    Stopped,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    /// Owns an OS thread running a blocking run loop.
    #[default]
    Worker,
    /// Borrows the starting thread; a host loop drives its hook run loop.
    Applet,
}

/// Configuration for creating a [`Thread`].
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub name: String,
    /// Stack size of the spawned OS thread; platform default when `None`.
    pub stack_size: Option<usize>,
    pub kind: ThreadKind,
}

impl ThreadConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
            kind: ThreadKind::Worker,
        }
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn with_kind(mut self, kind: ThreadKind) -> Self {
        self.kind = kind;
        self
    }
}

pub(crate) struct ThreadShared {
    config: ThreadConfig,
    data: Arc<ThreadData>,
    object: Object,
    status: Property<ThreadStatus>,
    status_writer: PropertyWriter<ThreadStatus>,
    exit_code: Property<i32>,
    exit_code_writer: PropertyWriter<i32>,
    started: Signal<()>,
    stopped: Signal<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    host_binding: Mutex<Option<Arc<ThreadData>>>,
}

impl ThreadShared {
    fn set_status(&self, status: ThreadStatus) {
        if let Err(err) = self.status_writer.set(status) {
            log::warn!("thread {}: status slot failed: {err}", self.config.name);
        }
    }

    fn set_exit_code(&self, exit_code: i32) {
        if let Err(err) = self.exit_code_writer.set(exit_code) {
            log::warn!("thread {}: exit code slot failed: {err}", self.config.name);
        }
    }

    fn emit(&self, signal: &Signal<()>, what: &str) {
        if let Err(err) = signal.emit(()) {
            log::warn!("thread {}: {what} slot failed: {err}", self.config.name);
        }
    }

    fn run_worker(self: Arc<Self>) {
        let previous = self.data.bind_current();
        log::debug!("thread {} running", self.config.name);
        self.emit(&self.started, "started");
        self.set_status(ThreadStatus::Running);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.data.run_loop().execute(ExecuteFlags::empty())
        }));
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                log::error!("thread {}: run loop failed: {err}", self.config.name);
                self.set_exit_code(-1);
            }
            Err(_) => {
                log::error!("thread {} panicked", self.config.name);
                self.set_exit_code(-1);
            }
        }

        self.stop_children();
        self.set_status(ThreadStatus::Stopped);
        self.emit(&self.stopped, "stopped");
        log::debug!("thread {} stopped ({})", self.config.name, self.exit_code.get());
        self.data.unbind_current(previous);
    }

    fn enter_applet(self: &Arc<Self>) -> Result<()> {
        *self.host_binding.lock() = self.data.bind_current();
        self.emit(&self.started, "started");
        self.set_status(ThreadStatus::Running);
        let shared = Arc::downgrade(self);
        self.data.run_loop().set_down_callback(move || {
            if let Some(shared) = shared.upgrade() {
                shared.leave_applet();
            }
        });
        self.data.run_loop().execute(ExecuteFlags::SINGLE_PASS).map(drop)
    }

    fn leave_applet(&self) {
        self.set_status(ThreadStatus::Stopped);
        self.emit(&self.stopped, "stopped");
        let previous = self.host_binding.lock().take();
        if self.data.is_current() {
            self.data.unbind_current(previous);
        }
        log::debug!("applet {} stopped", self.config.name);
    }

    fn request_exit(self: &Arc<Self>, exit_code: i32) {
        self.data
            .post_event(Event::quit(TargetRef::new(self), exit_code));
    }

    fn join(&self) -> Result<i32> {
        if self.config.kind == ThreadKind::Applet {
            return Err(Error::DetachedThread);
        }
        if self.data.is_current() {
            return Err(Error::AttemptThreadJoinWithin);
        }
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join().map_err(|_| Error::ThreadPanicked)?,
            None if self.status.get() == ThreadStatus::Inactive => {
                return Err(Error::DetachedThread);
            }
            None => {}
        }
        Ok(self.exit_code.get())
    }

    fn stop_children(&self) {
        for child in self.data.children() {
            let status = child.status.get();
            if child.config.kind != ThreadKind::Worker
                || !matches!(status, ThreadStatus::StartingUp | ThreadStatus::Running)
            {
                continue;
            }
            log::debug!("thread {} stopping child {}", self.config.name, child.config.name);
            child.request_exit(0);
            if let Err(err) = child.join() {
                log::warn!("joining child {} failed: {err}", child.config.name);
            }
        }
    }
}

impl EventTarget for ThreadShared {
    fn event(&self, event: &mut Event) -> bool {
        match event.payload {
            EventPayload::Quit { exit_code } => {
                self.set_exit_code(exit_code);
                self.data.run_loop().quit();
                true
            }
            _ => false,
        }
    }
}

/// Interface object controlling one runtime thread. Clones share the thread.
#[derive(Clone)]
pub struct Thread {
    shared: Arc<ThreadShared>,
}

impl Thread {
    pub fn new(config: ThreadConfig) -> Self {
        let platform = platform::current();
        let run_loop = match config.kind {
            ThreadKind::Worker => platform.create_run_loop_with(
                RunLoopConfig::builder()
                    .name(config.name.clone())
                    .kind(RunLoopKind::Worker)
                    .build(),
            ),
            ThreadKind::Applet => platform.create_run_loop_with(
                RunLoopConfig::builder()
                    .name(config.name.clone())
                    .kind(RunLoopKind::Hook)
                    .build(),
            ),
        };
        let data = ThreadData::new(&config.name, run_loop);
        let object = Object::thread_owner(&data);
        let host = Arc::clone(object.lockable());
        let (status, status_writer) =
            Property::read_only_with_host(Arc::clone(&host), ThreadStatus::Inactive);
        let (exit_code, exit_code_writer) = Property::read_only_with_host(Arc::clone(&host), 0);
        Self {
            shared: Arc::new(ThreadShared {
                config,
                data,
                object,
                status,
                status_writer,
                exit_code,
                exit_code_writer,
                started: Signal::with_host(Arc::clone(&host)),
                stopped: Signal::with_host(host),
                handle: Mutex::new(None),
                host_binding: Mutex::new(None),
            }),
        }
    }

    pub fn worker(name: impl Into<String>) -> Self {
        Self::new(ThreadConfig::new(name))
    }

    pub fn applet(name: impl Into<String>) -> Self {
        Self::new(ThreadConfig::new(name).with_kind(ThreadKind::Applet))
    }

    /// Starts the thread. Workers spawn their OS thread; applets bind the
    /// calling thread and run one pass of their loop.
    pub fn start(&self) -> Result<()> {
        let status = self.status();
        if status != ThreadStatus::Inactive {
            return Err(Error::InvalidArgument(format!(
                "thread {} cannot start while {status:?}",
                self.name()
            )));
        }
        ThreadData::current().register_child(&self.shared);
        self.shared.set_status(ThreadStatus::StartingUp);
        match self.shared.config.kind {
            ThreadKind::Worker => {
                let mut builder = std::thread::Builder::new().name(self.shared.config.name.clone());
                if let Some(size) = self.shared.config.stack_size {
                    builder = builder.stack_size(size);
                }
                let shared = Arc::clone(&self.shared);
                match builder.spawn(move || shared.run_worker()) {
                    Ok(handle) => {
                        *self.shared.handle.lock() = Some(handle);
                        Ok(())
                    }
                    Err(err) => {
                        self.shared.set_status(ThreadStatus::Inactive);
                        Err(Error::Spawn(err))
                    }
                }
            }
            ThreadKind::Applet => self.shared.enter_applet(),
        }
    }

    /// Asks the thread's loop to finish with `exit_code`. Callable from any
    /// thread; takes effect when the loop dispatches the request.
    pub fn exit(&self, exit_code: i32) {
        self.shared.request_exit(exit_code);
    }

    /// Waits for a worker to finish and returns its exit code.
    ///
    /// Fails with [`Error::AttemptThreadJoinWithin`] on the thread itself and
    /// with [`Error::DetachedThread`] for applets and never-started threads.
    pub fn join(&self) -> Result<i32> {
        self.shared.join()
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn kind(&self) -> ThreadKind {
        self.shared.config.kind
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ThreadStatus {
        self.shared.status.get()
    }

    pub fn status_property(&self) -> &Property<ThreadStatus> {
        &self.shared.status
    }

    pub fn is_running(&self) -> bool {
        self.status() == ThreadStatus::Running
    }

    pub fn exit_code(&self) -> i32 {
        self.shared.exit_code.get()
    }

    pub fn exit_code_property(&self) -> &Property<i32> {
        &self.shared.exit_code
    }

    pub fn started(&self) -> &Signal<()> {
        &self.shared.started
    }

    pub fn stopped(&self) -> &Signal<()> {
        &self.shared.stopped
    }

    pub fn thread_data(&self) -> &Arc<ThreadData> {
        &self.shared.data
    }

    pub fn run_loop(&self) -> &Arc<RunLoop> {
        self.shared.data.run_loop()
    }

    /// Object whose children are moved onto this thread.
    pub fn object(&self) -> &Object {
        &self.shared.object
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("status", &self.status())
            .finish()
    }
}
