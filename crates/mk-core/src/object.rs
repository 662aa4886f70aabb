//! Object tree with thread affinity.
//!
//! An [`Object`] is the host of a group of signals and properties: it owns
//! their shared [`Lockable`], the registry of inbound connections and the
//! [`ThreadData`] its slots run on. Objects form a parent/child tree;
//! re-parenting makes the object and its descendants adopt the parent's
//! thread.

use core::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::{Event, EventTarget, TargetRef};
use crate::id::ObjectId;
use crate::signal::{SlotHolder, Slots};
use crate::sync::{lock_all, Lockable};
use crate::thread::ThreadData;

struct ObjectInner {
    id: ObjectId,
    name: Mutex<String>,
    lock: Arc<Lockable>,
    slots: Slots,
    thread: Mutex<Arc<ThreadData>>,
    parent: Mutex<Weak<ObjectInner>>,
    children: Mutex<Vec<Weak<ObjectInner>>>,
    owned_thread: Option<Weak<ThreadData>>,
}

impl ObjectInner {
    fn thread(&self) -> Arc<ThreadData> {
        Arc::clone(&self.thread.lock())
    }

    fn parent(&self) -> Option<Arc<ObjectInner>> {
        self.parent.lock().upgrade()
    }

    fn children(&self) -> Vec<Arc<ObjectInner>> {
        self.children.lock().iter().filter_map(Weak::upgrade).collect()
    }

    fn set_thread_recursive(&self, thread: &Arc<ThreadData>) {
        *self.thread.lock() = Arc::clone(thread);
        for child in self.children() {
            child.set_thread_recursive(thread);
        }
    }

    fn is_ancestor_of(self: &Arc<Self>, other: &Arc<ObjectInner>) -> bool {
        let mut cursor = Some(Arc::clone(other));
        while let Some(node) = cursor {
            if Arc::ptr_eq(&node, self) {
                return true;
            }
            cursor = node.parent();
        }
        false
    }

    fn detach_from_parent(&self) {
        let previous = core::mem::take(&mut *self.parent.lock());
        if let Some(parent) = previous.upgrade() {
            parent
                .children
                .lock()
                .retain(|child| child.upgrade().is_some_and(|child| child.id != self.id));
        }
    }
}

/// Handle to an object. Clones share the same object.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

impl Object {
    /// Object affine to the calling thread.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_thread(name, ThreadData::current())
    }

    pub fn with_thread(name: impl Into<String>, thread: Arc<ThreadData>) -> Self {
        Self::build(name.into(), thread, None)
    }

    /// Object standing for the thread interface owning `thread`.
    pub(crate) fn thread_owner(thread: &Arc<ThreadData>) -> Self {
        Self::build(thread.name().to_owned(), Arc::clone(thread), Some(Arc::downgrade(thread)))
    }

    fn build(name: String, thread: Arc<ThreadData>, owned_thread: Option<Weak<ThreadData>>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                id: ObjectId::next(),
                name: Mutex::new(name),
                lock: Arc::new(Lockable::new()),
                slots: Slots::new(),
                thread: Mutex::new(thread),
                parent: Mutex::new(Weak::new()),
                children: Mutex::new(Vec::new()),
                owned_thread,
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn name(&self) -> String {
        self.inner.name.lock().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.lock() = name.into();
    }

    /// Host lock shared by the signals and properties of this object.
    pub fn lockable(&self) -> &Arc<Lockable> {
        &self.inner.lock
    }

    pub fn slots(&self) -> &Slots {
        &self.inner.slots
    }

    pub fn thread_data(&self) -> Arc<ThreadData> {
        self.inner.thread()
    }

    /// True for the object owned by a thread interface.
    pub fn is_thread_owner(&self) -> bool {
        self.inner.owned_thread.is_some()
    }

    pub fn parent(&self) -> Option<Object> {
        self.inner.parent().map(|inner| Self { inner })
    }

    pub fn children(&self) -> Vec<Object> {
        self.inner
            .children()
            .into_iter()
            .map(|inner| Self { inner })
            .collect()
    }

    pub fn child_count(&self) -> usize {
        self.inner
            .children
            .lock()
            .iter()
            .filter(|child| child.strong_count() > 0)
            .count()
    }

    /// Re-parents this object. The object and its descendants adopt the new
    /// parent's thread.
    ///
    /// A thread owner only accepts children that already live on its thread
    /// or that are moved from the calling thread.
    pub fn set_parent(&self, parent: Option<&Object>) -> Result<()> {
        let Some(parent) = parent else {
            let _guard = self.inner.lock.lock();
            self.inner.detach_from_parent();
            return Ok(());
        };
        if self.inner.is_ancestor_of(&parent.inner) {
            return Err(Error::InvalidArgument(format!(
                "{} cannot become a descendant of itself",
                self.inner.id
            )));
        }
        let target = parent.inner.thread();
        let current = self.inner.thread();
        if parent.is_thread_owner() && !Arc::ptr_eq(&target, &current) && !current.is_current() {
            return Err(Error::InvalidThreadOwnershipChange(format!(
                "{} lives on {} and cannot join thread owner {}",
                self.inner.id,
                current.id(),
                parent.inner.id
            )));
        }

        let _guard = lock_all(&[&*self.inner.lock, &*parent.inner.lock]);
        self.inner.detach_from_parent();
        *self.inner.parent.lock() = Arc::downgrade(&parent.inner);
        parent.inner.children.lock().push(Arc::downgrade(&self.inner));
        if !Arc::ptr_eq(&target, &current) {
            log::debug!("{} moves from {} to {}", self.inner.id, current.id(), target.id());
            self.inner.set_thread_recursive(&target);
        }
        Ok(())
    }

    /// Moves this object and its descendants to `thread`. Only root objects
    /// can be moved, and only from their own thread or an unbound one.
    pub fn move_to_thread(&self, thread: &Arc<ThreadData>) -> Result<()> {
        let current = self.inner.thread();
        if Arc::ptr_eq(&current, thread) {
            return Ok(());
        }
        if self.inner.parent().is_some() {
            return Err(Error::InvalidThreadOwnershipChange(format!(
                "{} has a parent and follows its thread",
                self.inner.id
            )));
        }
        if !current.is_current() && current.os_thread().is_some() {
            return Err(Error::InvalidThreadOwnershipChange(format!(
                "{} can only be moved from {}",
                self.inner.id,
                current.id()
            )));
        }
        let _guard = self.inner.lock.lock();
        self.inner.set_thread_recursive(thread);
        log::debug!("{} moved to {}", self.inner.id, thread.id());
        Ok(())
    }

    /// Queues `event` on this object's thread.
    pub fn post_event(&self, event: Event) -> bool {
        self.inner.thread().post_event(event)
    }
}

impl EventTarget for Object {}

impl SlotHolder for Object {
    fn slots(&self) -> &Slots {
        &self.inner.slots
    }

    fn thread_data(&self) -> Option<Arc<ThreadData>> {
        Some(self.inner.thread())
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Object {}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.inner.id)
            .field("name", &*self.inner.name.lock())
            .field("thread", &self.inner.thread().id())
            .field("children", &self.child_count())
            .finish()
    }
}

/// Posts `event` addressed to `target` on the thread the target is affine
/// to, or on the calling thread when it has no affinity.
pub fn post_event<T>(target: &Arc<T>, event: Event) -> bool
where
    T: SlotHolder + 'static,
{
    let event = event.with_target(TargetRef::new(target));
    match target.thread_data() {
        Some(thread) => thread.post_event(event),
        None => ThreadData::current().post_event(event),
    }
}
