//! Events delivered through a thread's run loop.
//!
//! An event carries a small header (type, priority, timestamp, flags), a weak
//! reference to its target and an optional payload. Events are posted to the
//! event source of the target thread and dispatched in priority order.

use core::fmt;
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Numeric event type. Values below [`EventType::USER`] are reserved.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventType(pub u16);

impl EventType {
    pub const NONE: EventType = EventType(0);
    /// Asks the receiving thread interface to leave its run loop.
    pub const QUIT: EventType = EventType(1);
    /// Carries a signal activation across threads.
    pub const DEFERRED_SIGNAL: EventType = EventType(2);
    /// First value available to applications.
    pub const USER: EventType = EventType(0x100);

    /// Application event type `offset` above [`EventType::USER`].
    pub const fn user(offset: u16) -> Self {
        Self(Self::USER.0 + offset)
    }

    pub fn is_user(self) -> bool {
        self.0 >= Self::USER.0
    }
}

impl From<u16> for EventType {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVT({:#06x})", self.0)
    }
}

/// Dispatch priority. Lower sorts first.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
    Low,
}

/// Metadata shared by all events.
#[derive(Debug, Clone, Copy)]
pub struct EventHeader {
    pub event_type: EventType,
    pub priority: Priority,
    /// Set when the event enters a queue.
    pub timestamp: Option<Instant>,
    pub handled: bool,
    pub compressible: bool,
}

impl EventHeader {
    pub const fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            priority: Priority::Normal,
            timestamp: None,
            handled: false,
            compressible: false,
        }
    }
}

/// Receives events dispatched by a run loop.
pub trait EventTarget: Send + Sync {
    /// Handles `event`; returns `true` when it was consumed.
    fn event(&self, event: &mut Event) -> bool {
        let _ = event;
        false
    }
}

/// Weak, comparable reference to an event target.
///
/// Two references are equal when they point at the same allocation. The
/// weak count keeps that allocation reserved, so a target created after the
/// original was dropped never compares equal to it.
#[derive(Clone)]
pub struct TargetRef {
    target: Weak<dyn EventTarget>,
}

impl TargetRef {
    pub fn new<T: EventTarget + 'static>(target: &Arc<T>) -> Self {
        let weak: Weak<dyn EventTarget> = Arc::downgrade(target) as Weak<T>;
        Self { target: weak }
    }

    pub fn from_weak(target: Weak<dyn EventTarget>) -> Self {
        Self { target }
    }

    pub fn upgrade(&self) -> Option<Arc<dyn EventTarget>> {
        self.target.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl PartialEq for TargetRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.target, &other.target)
    }
}

impl Eq for TargetRef {}

impl fmt::Debug for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetRef({:p})", self.target.as_ptr() as *const ())
    }
}

/// Signal activation re-played on the receiver's thread.
pub struct DeferredSignal {
    invoke: Box<dyn FnOnce() -> Result<()> + Send>,
}

impl DeferredSignal {
    pub fn new(invoke: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            invoke: Box::new(invoke),
        }
    }

    pub fn invoke(self) -> Result<()> {
        (self.invoke)()
    }
}

impl fmt::Debug for DeferredSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredSignal")
    }
}

/// Type-erased event payload for application events.
pub type DynPayload = Arc<dyn Any + Send + Sync>;

pub enum EventPayload {
    None,
    Quit { exit_code: i32 },
    Deferred(DeferredSignal),
    Data(DynPayload),
}

impl fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::None => f.write_str("None"),
            EventPayload::Quit { exit_code } => write!(f, "Quit({exit_code})"),
            EventPayload::Deferred(deferred) => fmt::Debug::fmt(deferred, f),
            EventPayload::Data(_) => f.write_str("Data(..)"),
        }
    }
}

/// Event envelope handled by the event source.
#[derive(Debug)]
pub struct Event {
    pub header: EventHeader,
    target: Option<TargetRef>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            header: EventHeader::new(event_type),
            target: None,
            payload: EventPayload::None,
        }
    }

    /// Event of `event_type` addressed to `target`.
    pub fn to<T: EventTarget + 'static>(target: &Arc<T>, event_type: EventType) -> Self {
        Self::new(event_type).with_target(TargetRef::new(target))
    }

    /// Urgent quit request carrying `exit_code`.
    pub fn quit(target: TargetRef, exit_code: i32) -> Self {
        Self::new(EventType::QUIT)
            .with_target(target)
            .with_priority(Priority::Urgent)
            .with_payload(EventPayload::Quit { exit_code })
    }

    /// Urgent, never compressed, cross-thread signal activation.
    pub fn deferred_signal(target: Option<TargetRef>, deferred: DeferredSignal) -> Self {
        let mut event = Self::new(EventType::DEFERRED_SIGNAL)
            .with_priority(Priority::Urgent)
            .with_payload(EventPayload::Deferred(deferred));
        event.target = target;
        event
    }

    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.header.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_data(self, data: DynPayload) -> Self {
        self.with_payload(EventPayload::Data(data))
    }

    /// Marks the event as collapsible with queued events of the same type and
    /// target.
    pub fn compressible(mut self, compressible: bool) -> Self {
        self.header.compressible = compressible;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.header.event_type
    }

    pub fn priority(&self) -> Priority {
        self.header.priority
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.header.timestamp
    }

    pub fn target(&self) -> Option<&TargetRef> {
        self.target.as_ref()
    }

    pub fn is_handled(&self) -> bool {
        self.header.handled
    }

    pub fn accept(&mut self) {
        self.header.handled = true;
    }

    pub fn ignore(&mut self) {
        self.header.handled = false;
    }

    /// Typed access to an application payload.
    pub fn data<T: Any>(&self) -> Option<&T> {
        match &self.payload {
            EventPayload::Data(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// True when `self` would collapse into `queued`.
    pub fn compresses_with(&self, queued: &Event) -> bool {
        self.header.compressible
            && queued.header.compressible
            && self.header.event_type == queued.header.event_type
            && self.target == queued.target
    }
}

/// Delivers `event` to `target` synchronously on the calling thread.
pub fn send_event(target: &dyn EventTarget, event: &mut Event) -> bool {
    let handled = target.event(event);
    if handled {
        event.accept();
    }
    handled
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sink;

    impl EventTarget for Sink {
        fn event(&self, event: &mut Event) -> bool {
            event.event_type() == EventType::user(1)
        }
    }

    #[test]
    fn dropped_target_never_matches_a_new_one() {
        let first = Arc::new(Sink);
        let stale = Event::to(&first, EventType::user(1)).compressible(true);
        drop(first);

        for _ in 0..64 {
            let fresh = Arc::new(Sink);
            let event = Event::to(&fresh, EventType::user(1)).compressible(true);
            assert!(!event.compresses_with(&stale));
            assert!(stale.target().is_some_and(|target| !target.is_alive()));
        }
    }

    #[test]
    fn compression_requires_same_type_and_target() {
        let a = Arc::new(Sink);
        let b = Arc::new(Sink);
        let first = Event::to(&a, EventType::user(1)).compressible(true);
        let same = Event::to(&a, EventType::user(1)).compressible(true);
        let other_target = Event::to(&b, EventType::user(1)).compressible(true);
        let other_type = Event::to(&a, EventType::user(2)).compressible(true);
        let plain = Event::to(&a, EventType::user(1));

        assert!(same.compresses_with(&first));
        assert!(!other_target.compresses_with(&first));
        assert!(!other_type.compresses_with(&first));
        assert!(!plain.compresses_with(&first));
    }

    #[test]
    fn send_event_marks_handled() {
        let sink = Sink;
        let mut handled = Event::new(EventType::user(1));
        let mut ignored = Event::new(EventType::user(2));
        assert!(send_event(&sink, &mut handled));
        assert!(handled.is_handled());
        assert!(!send_event(&sink, &mut ignored));
        assert!(!ignored.is_handled());
    }

    #[test]
    fn user_payload_downcasts() {
        let event = Event::new(EventType::USER).with_data(Arc::new(7_u32));
        assert_eq!(event.data::<u32>(), Some(&7));
        assert_eq!(event.data::<i32>(), None);
        assert!(event.event_type().is_user());
    }
}
