use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::EventTarget;
use crate::signal::connection::{Connection, ConnectionInner};
use crate::thread::ThreadData;

/// Inbound connection registry embedded in every receiver.
///
/// Dropping it disconnects every connection still targeting the receiver, so
/// no signal outlives its receivers with a dangling slot.
#[derive(Default)]
pub struct Slots {
    inbound: Mutex<Vec<Weak<ConnectionInner>>>,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, connection: &Connection) {
        let mut inbound = self.inbound.lock();
        inbound.retain(|entry| entry.upgrade().is_some_and(|entry| entry.is_live()));
        inbound.push(Arc::downgrade(&connection.inner));
    }

    /// Live connections targeting this receiver.
    pub fn connection_count(&self) -> usize {
        self.inbound
            .lock()
            .iter()
            .filter(|entry| entry.upgrade().is_some_and(|entry| entry.is_live()))
            .count()
    }

    /// Disconnects every inbound connection; returns how many were live.
    pub fn disconnect_all(&self) -> usize {
        let inbound = core::mem::take(&mut *self.inbound.lock());
        inbound
            .into_iter()
            .filter_map(|entry| entry.upgrade())
            .filter(|entry| entry.disconnect().is_ok())
            .count()
    }
}

impl Drop for Slots {
    fn drop(&mut self) {
        let dropped = self.disconnect_all();
        if dropped > 0 {
            log::trace!("receiver dropped, {dropped} connection(s) removed");
        }
    }
}

/// Receiver of method connections.
pub trait SlotHolder: EventTarget {
    fn slots(&self) -> &Slots;

    /// Thread the receiver is affine to. Receivers returning `Some` get
    /// thread-affined connections.
    fn thread_data(&self) -> Option<Arc<ThreadData>> {
        None
    }
}
