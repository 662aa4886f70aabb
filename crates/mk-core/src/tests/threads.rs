use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::run_loop::ExecuteFlags;
use crate::source::IdleStatus;
use crate::thread::{Thread, ThreadConfig, ThreadData, ThreadKind, ThreadStatus};
use crate::Error;

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn worker_runs_until_exit_and_reports_code() {
    let thread = Thread::worker("exit-code");
    let started = Arc::new(AtomicUsize::new(0));
    let stopped = Arc::new(AtomicUsize::new(0));
    let (s, t) = (Arc::clone(&started), Arc::clone(&stopped));
    thread
        .started()
        .connect(move || {
            s.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    thread
        .stopped()
        .connect(move || {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(thread.status(), ThreadStatus::Inactive);

    thread.start().unwrap();
    thread.exit(7);
    assert_eq!(thread.join().unwrap(), 7);

    assert_eq!(thread.status(), ThreadStatus::Stopped);
    assert_eq!(thread.exit_code(), 7);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert!(thread.thread_data().os_thread().is_none());
}

#[test]
fn panicking_worker_stops_with_failure_code() {
    let thread = Thread::worker("doomed");
    let stopped = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&stopped);
    thread
        .stopped()
        .connect(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    thread.run_loop().on_idle(|| panic!("worker task failed"));

    thread.start().unwrap();
    assert_eq!(thread.join().unwrap(), -1);

    assert_eq!(thread.status(), ThreadStatus::Stopped);
    assert_ne!(thread.exit_code(), 0);
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn worker_status_is_observable() {
    let thread = Thread::new(ThreadConfig::new("observed").with_stack_size(256 * 1024));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    thread
        .status_property()
        .changed()
        .connect(move |status: ThreadStatus| sink.lock().push(status))
        .unwrap();

    thread.start().unwrap();
    thread.exit(0);
    thread.join().unwrap();

    assert_eq!(
        *seen.lock(),
        vec![ThreadStatus::StartingUp, ThreadStatus::Running, ThreadStatus::Stopped]
    );
    assert!(thread.status_property().is_read_only());
    assert!(matches!(thread.status_property().set(ThreadStatus::Running), Err(Error::WriteReadOnly(_))));
}

#[test]
fn lifecycle_misuse_is_reported() {
    let thread = Thread::worker("misuse");
    assert!(matches!(thread.join(), Err(Error::DetachedThread)));

    thread.start().unwrap();
    assert!(matches!(thread.start(), Err(Error::InvalidArgument(_))));

    let joined_within = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&joined_within);
    let inner = thread.clone();
    thread.run_loop().on_idle(move || {
        *sink.lock() = Some(inner.join());
        inner.exit(1);
        IdleStatus::Done
    });

    assert_eq!(thread.join().unwrap(), 1);
    assert!(matches!(*joined_within.lock(), Some(Err(Error::AttemptThreadJoinWithin))));
    assert_eq!(thread.join().unwrap(), 1);
}

#[test]
fn worker_binds_its_own_thread_data() {
    let thread = Thread::worker("bound");
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let expected = thread.thread_data().id();
    thread.run_loop().on_idle(move || {
        *sink.lock() = Some((ThreadData::current().id(), std::thread::current().name().map(str::to_owned)));
        IdleStatus::Done
    });

    thread.start().unwrap();
    wait_for(|| observed.lock().is_some());
    thread.exit(0);
    thread.join().unwrap();

    assert_eq!(*observed.lock(), Some((expected, Some("bound".to_owned()))));
    assert_ne!(ThreadData::current().id(), expected);
}

#[test]
fn stopping_worker_stops_its_children() {
    let parent = Thread::worker("parent");
    let child_slot: Arc<Mutex<Option<Thread>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&child_slot);
    parent.run_loop().on_idle(move || {
        let child = Thread::worker("child");
        child.start().unwrap();
        *sink.lock() = Some(child);
        IdleStatus::Done
    });

    parent.start().unwrap();
    wait_for(|| child_slot.lock().is_some());
    assert_eq!(parent.thread_data().child_count(), 1);

    parent.exit(0);
    parent.join().unwrap();

    let child = child_slot.lock().clone().unwrap();
    assert_eq!(child.status(), ThreadStatus::Stopped);
    assert_eq!(child.exit_code(), 0);
}

#[test]
fn applet_borrows_the_calling_thread() {
    let host = ThreadData::current();
    let applet = Thread::applet("applet");
    assert_eq!(applet.kind(), ThreadKind::Applet);
    assert!(applet.run_loop().is_hook());

    applet.start().unwrap();
    assert_eq!(applet.status(), ThreadStatus::Running);
    assert!(applet.thread_data().is_current());
    assert!(matches!(applet.join(), Err(Error::DetachedThread)));

    applet.exit(3);
    applet.run_loop().execute(ExecuteFlags::empty()).unwrap();

    assert_eq!(applet.status(), ThreadStatus::Stopped);
    assert_eq!(applet.exit_code(), 3);
    assert!(host.is_current());
}
