use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::event::{send_event, Event, EventPayload};
use crate::queue::EventQueue;
use crate::run_loop::RunLoop;
use crate::source::{Readiness, Source, SourceLink};

/// Dispatches the thread's posted events.
pub struct EventSource {
    name: String,
    queue: EventQueue,
    link: SourceLink,
    delivered: AtomicU64,
}

impl EventSource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            queue: EventQueue::new(),
            link: SourceLink::new(),
            delivered: AtomicU64::new(0),
        })
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Queues `event` and wakes the run loop. Returns `false` when the event
    /// was compressed into a queued one.
    pub fn post(&self, event: Event) -> bool {
        let queued = self.queue.push(event);
        if queued {
            self.link.wake();
        }
        queued
    }

    /// Events delivered since creation.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    fn deliver(&self, mut event: Event) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        match core::mem::replace(&mut event.payload, EventPayload::None) {
            EventPayload::Deferred(deferred) => {
                if let Err(err) = deferred.invoke() {
                    log::warn!("deferred slot failed: {err}");
                }
            }
            payload => {
                event.payload = payload;
                match event.target().and_then(|target| target.upgrade()) {
                    Some(target) => {
                        if !send_event(target.as_ref(), &mut event) {
                            log::trace!("{} was not handled", event.event_type());
                        }
                    }
                    None => log::trace!("{} dropped, target is gone", event.event_type()),
                }
            }
        }
    }
}

impl Source for EventSource {
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

    fn prepare(&self, _now: Instant) -> Readiness {
        if self.queue.is_empty() {
            Readiness::Pending(None)
        } else {
            Readiness::Ready
        }
    }

    /// Delivers the events queued when the dispatch began. Events posted by
    /// handlers wait for the next pass.
    fn dispatch(&self, run_loop: &RunLoop) -> Result<()> {
        let pending = self.queue.len();
        for _ in 0..pending {
            if run_loop.is_exiting() {
                break;
            }
            let Some(event) = self.queue.pop() else {
                break;
            };
            self.deliver(event);
        }
        Ok(())
    }
}
