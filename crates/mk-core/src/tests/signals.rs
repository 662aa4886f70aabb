use std::sync::Arc;

use mk_meta::{Descriptor, Signature};
use parking_lot::Mutex;

use crate::event::EventTarget;
use crate::signal::{Connection, ConnectionType, Signal, SlotHolder, Slots};
use crate::Error;

#[derive(Default)]
struct Recorder {
    slots: Slots,
    seen: Mutex<Vec<i64>>,
}

impl EventTarget for Recorder {}

impl SlotHolder for Recorder {
    fn slots(&self) -> &Slots {
        &self.slots
    }
}

#[test]
fn emit_reaches_every_slot_in_order() {
    let signal: Signal<(i32, String)> = Signal::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&log);
    signal
        .connect(move |value: i32, text: String| first.lock().push(format!("a{value}{text}")))
        .unwrap();
    let second = Arc::clone(&log);
    signal
        .connect(move |value: i32| second.lock().push(format!("b{value}")))
        .unwrap();

    assert_eq!(signal.emit((3, "x".into())).unwrap(), 2);
    assert_eq!(*log.lock(), vec!["a3x".to_string(), "b3".to_string()]);
}

#[test]
fn empty_and_blocked_signals() {
    let signal: Signal<(i32,)> = Signal::new();
    assert_eq!(signal.emit((1,)).unwrap(), -1);

    let hits = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&hits);
    signal.connect(move |_: i32| *counter.lock() += 1).unwrap();

    assert!(!signal.block(true));
    assert_eq!(signal.emit((1,)).unwrap(), 0);
    assert!(signal.block(false));
    assert_eq!(signal.emit((1,)).unwrap(), 1);
    assert_eq!(*hits.lock(), 1);
}

#[test]
fn slot_connected_during_emit_waits_for_the_next_one() {
    let signal: Signal<(i32,)> = Signal::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (outer_log, inner_log) = (Arc::clone(&log), Arc::clone(&log));
    let inner_signal = signal.clone();
    let connected = Mutex::new(false);
    signal
        .connect(move |value: i32| {
            outer_log.lock().push(format!("outer{value}"));
            let mut connected = connected.lock();
            if !*connected {
                *connected = true;
                let late = Arc::clone(&inner_log);
                inner_signal
                    .connect(move |value: i32| late.lock().push(format!("late{value}")))
                    .unwrap();
            }
        })
        .unwrap();

    assert_eq!(signal.emit((1,)).unwrap(), 1);
    assert_eq!(*log.lock(), vec!["outer1".to_string()]);

    assert_eq!(signal.emit((2,)).unwrap(), 2);
    assert_eq!(
        *log.lock(),
        vec!["outer1".to_string(), "outer2".to_string(), "late2".to_string()]
    );
}

#[test]
fn slot_arguments_are_converted() {
    let signal: Signal<(i32,)> = Signal::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    signal.connect(move |value: i64| *sink.lock() = Some(value)).unwrap();

    signal.emit((41,)).unwrap();
    assert_eq!(*seen.lock(), Some(41));
}

#[test]
fn incompatible_slot_is_rejected() {
    let signal: Signal<(i32,)> = Signal::new();
    let err = signal.connect(|_: Vec<u8>| {}).unwrap_err();
    assert!(matches!(err, Error::SignatureMismatch { .. }));

    let longer = signal.connect(|_: i32, _: i32| {}).unwrap_err();
    assert!(matches!(longer, Error::SignatureMismatch { .. }));
    assert_eq!(signal.connection_count(), 0);
}

#[test]
fn failing_slot_stops_activation() {
    let signal: Signal<()> = Signal::new();
    let reached = Arc::new(Mutex::new(false));
    signal.connect(|| -> crate::Result<()> { Err(Error::slot("boom")) }).unwrap();
    let flag = Arc::clone(&reached);
    signal.connect(move || *flag.lock() = true).unwrap();

    let err = signal.emit(()).unwrap_err();
    assert!(matches!(err, Error::Slot(reason) if reason == "boom"));
    assert!(!*reached.lock());
}

#[test]
fn disconnect_during_emit_skips_later_slots() {
    let signal: Signal<()> = Signal::new();
    let victim: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));
    let hits = Arc::new(Mutex::new(0));

    let slot_victim = Arc::clone(&victim);
    signal
        .connect(move || {
            if let Some(connection) = slot_victim.lock().take() {
                connection.disconnect().unwrap();
            }
        })
        .unwrap();
    let counter = Arc::clone(&hits);
    let second = signal.connect(move || *counter.lock() += 1).unwrap();
    *victim.lock() = Some(second.clone());

    assert_eq!(signal.emit(()).unwrap(), 1);
    assert_eq!(*hits.lock(), 0);
    assert!(!second.is_live());
    assert_eq!(signal.connection_count(), 1);
    assert!(matches!(second.disconnect(), Err(Error::Disconnected)));
}

#[test]
fn reentrant_emit_on_same_thread_is_ignored() {
    let signal: Signal<()> = Signal::new();
    let inner = signal.clone();
    let nested = Arc::new(Mutex::new(None));
    let result = Arc::clone(&nested);
    signal
        .connect(move || *result.lock() = Some(inner.emit(()).unwrap()))
        .unwrap();

    assert_eq!(signal.emit(()).unwrap(), 1);
    assert_eq!(*nested.lock(), Some(0));
}

#[test]
fn chained_signal_forwards_arguments() {
    let source: Signal<(i32,)> = Signal::new();
    let target: Signal<(i32,)> = Signal::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    target.connect(move |value: i32| sink.lock().push(value)).unwrap();

    let chain = source.connect_signal(&target).unwrap();
    assert_eq!(chain.connection_type(), ConnectionType::Signal);
    source.emit((5,)).unwrap();
    assert_eq!(*seen.lock(), vec![5]);

    drop(target);
    assert_eq!(source.emit((6,)).unwrap(), 0);
    assert_eq!(source.connection_count(), 0);
}

#[test]
fn method_connection_dies_with_receiver() {
    let signal: Signal<(i64,)> = Signal::new();
    let recorder = Arc::new(Recorder::default());
    let connection = signal
        .connect_method(&recorder, |recorder: &Recorder, value: i64| recorder.seen.lock().push(value))
        .unwrap();
    assert_eq!(connection.connection_type(), ConnectionType::Method);
    assert_eq!(recorder.slots().connection_count(), 1);

    signal.emit((1,)).unwrap();
    assert_eq!(*recorder.seen.lock(), vec![1]);

    drop(recorder);
    assert!(!connection.is_live());
    assert_eq!(signal.emit((2,)).unwrap(), -1);
}

#[test]
fn current_connection_is_visible_inside_slot() {
    let signal: Signal<()> = Signal::new();
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    let connection = signal
        .connect(move || *sink.lock() = Connection::current().map(|current| current.id()))
        .unwrap();

    signal.emit(()).unwrap();
    assert_eq!(*observed.lock(), Some(connection.id()));
    assert_eq!(connection.signal_id(), signal.id());
    assert!(Connection::current().is_none());
}

#[test]
fn scoped_connection_disconnects_on_drop() {
    let signal: Signal<()> = Signal::new();
    {
        let scoped = signal.connect(|| {}).unwrap().scoped();
        assert!(scoped.connection().is_some_and(Connection::is_live));
        assert_eq!(signal.connection_count(), 1);
    }
    assert_eq!(signal.connection_count(), 0);

    let kept = signal.connect(|| {}).unwrap().scoped().release().unwrap();
    assert!(kept.is_live());
}

#[test]
fn packed_slot_reads_arguments_by_index() {
    let signal: Signal<(i32, bool)> = Signal::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    signal
        .connect_packed(
            Signature::new(vec![Descriptor::of::<i32>(), Descriptor::of::<bool>()]),
            move |args, registry| {
                *sink.lock() = Some((args.get_in::<i32>(registry, 0)?, args.get_in::<bool>(registry, 1)?));
                Ok(())
            },
        )
        .unwrap();

    signal.emit((9, true)).unwrap();
    assert_eq!(*seen.lock(), Some((9, true)));
}

#[test]
fn disconnect_rejects_foreign_connection() {
    let a: Signal<()> = Signal::new();
    let b: Signal<()> = Signal::new();
    let connection = a.connect(|| {}).unwrap();
    assert!(matches!(b.disconnect(&connection), Err(Error::InvalidArgument(_))));
    a.disconnect(&connection).unwrap();
    assert!(!connection.is_live());
}
