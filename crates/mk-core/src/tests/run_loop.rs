use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event::{Event, EventTarget, EventType, Priority};
use crate::run_loop::{ExecuteFlags, ExecuteStatus, RunLoop, RunLoopConfig, RunLoopKind};
use crate::source::{IdleStatus, Readiness, Source, SourceLink, Timer, IDLE_SOURCE};
use crate::Error;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<EventType>>,
}

impl EventTarget for Recorder {
    fn event(&self, event: &mut Event) -> bool {
        self.seen.lock().push(event.event_type());
        true
    }
}

fn test_loop(name: &str) -> Arc<RunLoop> {
    RunLoop::new(
        RunLoopConfig::builder()
            .name(name)
            .max_wait(Duration::from_millis(20))
            .build(),
    )
}

#[test]
fn events_dispatch_by_priority_then_fifo() {
    let run_loop = test_loop("priorities");
    let recorder = Arc::new(Recorder::default());

    run_loop.post_event(Event::to(&recorder, EventType::user(1)).with_priority(Priority::Low));
    run_loop.post_event(Event::to(&recorder, EventType::user(2)));
    run_loop.post_event(Event::to(&recorder, EventType::user(3)).with_priority(Priority::Urgent));
    run_loop.post_event(Event::to(&recorder, EventType::user(4)));

    assert!(run_loop.process_events().unwrap());
    assert_eq!(
        *recorder.seen.lock(),
        vec![
            EventType::user(3),
            EventType::user(2),
            EventType::user(4),
            EventType::user(1)
        ]
    );
    assert_eq!(run_loop.event_source().delivered(), 4);
}

#[test]
fn compressible_events_collapse() {
    let run_loop = test_loop("compression");
    let recorder = Arc::new(Recorder::default());

    assert!(run_loop.post_event(Event::to(&recorder, EventType::user(1)).compressible(true)));
    assert!(!run_loop.post_event(Event::to(&recorder, EventType::user(1)).compressible(true)));
    assert_eq!(run_loop.event_source().queue().len(), 1);

    run_loop.process_events().unwrap();
    assert_eq!(recorder.seen.lock().len(), 1);
}

#[test]
fn events_for_dropped_targets_are_discarded() {
    let run_loop = test_loop("dropped");
    let recorder = Arc::new(Recorder::default());
    run_loop.post_event(Event::to(&recorder, EventType::user(1)));
    drop(recorder);

    assert!(run_loop.process_events().unwrap());
    assert!(run_loop.event_source().queue().is_empty());
}

#[test]
fn idle_tasks_wait_for_a_quiet_pass() {
    let run_loop = test_loop("idle");
    let recorder = Arc::new(Recorder::default());
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    run_loop.on_idle(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            IdleStatus::Keep
        } else {
            IdleStatus::Done
        }
    });
    run_loop.post_event(Event::to(&recorder, EventType::user(1)));

    run_loop.process_events().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.seen.lock().len(), 1);

    run_loop.process_events().unwrap();
    run_loop.process_events().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert!(run_loop.idle_source().is_empty());
    assert!(!run_loop.has_pending_work());
}

#[test]
fn quit_finishes_execute_and_fires_down_callback() {
    let run_loop = test_loop("quit");
    let down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&down);
    run_loop.set_down_callback(move || flag.store(true, Ordering::SeqCst));

    let weak = Arc::downgrade(&run_loop);
    run_loop.on_idle(move || {
        if let Some(run_loop) = weak.upgrade() {
            run_loop.quit();
        }
        IdleStatus::Done
    });

    assert_eq!(run_loop.execute(ExecuteFlags::empty()).unwrap(), ExecuteStatus::Exited);
    assert!(down.load(Ordering::SeqCst));
    assert!(!run_loop.is_running());
    assert!(!run_loop.is_exiting());
}

#[test]
fn nested_execute_is_rejected() {
    let run_loop = test_loop("nested");
    let nested = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&run_loop);
    let sink = Arc::clone(&nested);
    run_loop.on_idle(move || {
        if let Some(run_loop) = weak.upgrade() {
            *sink.lock() = Some(run_loop.execute(ExecuteFlags::SINGLE_PASS));
            run_loop.quit();
        }
        IdleStatus::Done
    });

    run_loop.execute(ExecuteFlags::empty()).unwrap();
    assert!(matches!(*nested.lock(), Some(Err(Error::InvalidArgument(_)))));
}

#[test]
fn single_pass_yields_without_blocking() {
    let run_loop = test_loop("single");
    let started = Instant::now();
    assert_eq!(run_loop.execute(ExecuteFlags::SINGLE_PASS).unwrap(), ExecuteStatus::Yielded);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(run_loop.passes(), 1);
}

#[test]
fn periodic_timer_keeps_firing_until_stopped() {
    let run_loop = test_loop("periodic");
    let timer = Timer::with_run_loop(&run_loop, Duration::from_millis(5));
    let weak = Arc::downgrade(&run_loop);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    timer
        .timeout()
        .connect(move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                if let Some(run_loop) = weak.upgrade() {
                    run_loop.quit();
                }
            }
        })
        .unwrap();

    timer.start();
    assert!(timer.is_running());
    assert_eq!(run_loop.timer_source().active_count(), 1);
    run_loop.execute(ExecuteFlags::empty()).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert_eq!(timer.fired_count(), 3);
    assert!(timer.is_running());
    timer.stop();
    assert!(!timer.is_running());
    assert!(timer.remaining().is_none());
}

struct Counting {
    link: SourceLink,
    pending: AtomicBool,
    dispatched: AtomicUsize,
}

impl Source for Counting {
    fn name(&self) -> &str {
        "counting"
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

    fn prepare(&self, _now: Instant) -> Readiness {
        if self.pending.load(Ordering::SeqCst) {
            Readiness::Ready
        } else {
            Readiness::Pending(None)
        }
    }

    fn dispatch(&self, _run_loop: &RunLoop) -> crate::Result<()> {
        self.pending.store(false, Ordering::SeqCst);
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn user_sources_join_and_leave() {
    let run_loop = test_loop("sources");
    let source = Arc::new(Counting {
        link: SourceLink::new(),
        pending: AtomicBool::new(true),
        dispatched: AtomicUsize::new(0),
    });

    let slot = run_loop.add_source(Arc::clone(&source) as Arc<dyn Source>);
    assert_eq!(slot, IDLE_SOURCE + 1);
    assert!(source.link.is_attached());
    assert!(run_loop.has_pending_work());
    run_loop.process_events().unwrap();
    assert_eq!(source.dispatched.load(Ordering::SeqCst), 1);

    assert!(matches!(run_loop.remove_source(IDLE_SOURCE), Err(Error::InvalidArgument(_))));
    assert!(matches!(run_loop.remove_source(slot + 1), Err(Error::InvalidArgument(_))));
    let removed = run_loop.remove_source(slot).unwrap();
    assert_eq!(removed.name(), "counting");
    assert!(!source.link.is_attached());
    assert_eq!(run_loop.source_count(), IDLE_SOURCE + 1);
}

#[test]
fn hook_loop_runs_one_pass_per_call() {
    let hook = RunLoop::create_hook();
    assert_eq!(hook.kind(), RunLoopKind::Hook);
    let recorder = Arc::new(Recorder::default());
    hook.post_event(Event::to(&recorder, EventType::user(7)));

    assert_eq!(hook.execute(ExecuteFlags::empty()).unwrap(), ExecuteStatus::Yielded);
    assert_eq!(*recorder.seen.lock(), vec![EventType::user(7)]);

    let down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&down);
    hook.set_down_callback(move || flag.store(true, Ordering::SeqCst));
    hook.host_exited();
    assert!(down.load(Ordering::SeqCst));
}
